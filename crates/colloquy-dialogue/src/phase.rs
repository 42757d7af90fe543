//! Phase transitions of the dialogue state machine.
//!
//! Greeting -> Understanding -> Searching/Responding -> Clarifying -> Ending.
//! Every transition is a pure function of the current phase, the turn's
//! intent, the search outcome and the session counters; the controller
//! performs side effects around it.

use colloquy_core::config::DialogueConfig;
use colloquy_core::types::{EndReason, IntentLabel, Phase};

/// What the Searching phase produced this turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    /// Searching did not run.
    NotRun,
    /// Number of validated chunks.
    Found(usize),
    /// Search ran but nothing survived validation.
    Empty,
}

/// Next phase after `from`.
///
/// `end` carries the session-end condition evaluated for this turn, if any.
/// It only matters when leaving `Responding`; goodbye is handled directly
/// from `Understanding`.
pub fn transition(
    from: Phase,
    label: Option<IntentLabel>,
    search: SearchOutcome,
    end: Option<EndReason>,
) -> Phase {
    match from {
        Phase::Greeting => Phase::Understanding,
        Phase::Understanding | Phase::FollowUp => match label {
            Some(IntentLabel::Goodbye) => Phase::Ending,
            Some(IntentLabel::Greeting) | Some(IntentLabel::Help) => Phase::Responding,
            _ => Phase::Searching,
        },
        Phase::Searching => match search {
            SearchOutcome::Found(n) if n > 0 => Phase::Responding,
            _ => Phase::Clarifying,
        },
        Phase::Clarifying => Phase::Understanding,
        Phase::Responding => {
            if end.is_some() {
                Phase::Ending
            } else {
                Phase::Understanding
            }
        }
        Phase::Ending => Phase::Ending,
    }
}

/// Whether `from -> to` is an edge of the state machine.
pub fn is_valid_transition(from: Phase, to: Phase) -> bool {
    matches!(
        (from, to),
        (Phase::Greeting, Phase::Understanding)
            | (Phase::Understanding, Phase::Ending)
            | (Phase::Understanding, Phase::Responding)
            | (Phase::Understanding, Phase::Searching)
            | (Phase::FollowUp, Phase::Ending)
            | (Phase::FollowUp, Phase::Responding)
            | (Phase::FollowUp, Phase::Searching)
            | (Phase::Searching, Phase::Responding)
            | (Phase::Searching, Phase::Clarifying)
            | (Phase::Clarifying, Phase::Understanding)
            | (Phase::Responding, Phase::Ending)
            | (Phase::Responding, Phase::Understanding)
    )
}

/// Session-end condition, checked in a fixed order: goodbye, turn limit,
/// retry limit, error limit.
pub fn end_reason(
    label: Option<IntentLabel>,
    turn_count: u32,
    retry_count: u32,
    error_count: usize,
    limits: &DialogueConfig,
) -> Option<EndReason> {
    if label == Some(IntentLabel::Goodbye) {
        Some(EndReason::Goodbye)
    } else if turn_count > limits.max_turns {
        Some(EndReason::TurnLimit)
    } else if retry_count > limits.max_retries {
        Some(EndReason::RetryLimit)
    } else if error_count >= limits.max_errors {
        Some(EndReason::ErrorLimit)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---- transitions ----

    #[test]
    fn test_greeting_always_moves_to_understanding() {
        for label in IntentLabel::ALL {
            assert_eq!(
                transition(Phase::Greeting, Some(label), SearchOutcome::NotRun, None),
                Phase::Understanding
            );
        }
    }

    #[test]
    fn test_understanding_routes_by_intent() {
        let t = |label| transition(Phase::Understanding, Some(label), SearchOutcome::NotRun, None);
        assert_eq!(t(IntentLabel::Goodbye), Phase::Ending);
        assert_eq!(t(IntentLabel::Greeting), Phase::Responding);
        assert_eq!(t(IntentLabel::Help), Phase::Responding);
        assert_eq!(t(IntentLabel::Question), Phase::Searching);
        assert_eq!(t(IntentLabel::Comparison), Phase::Searching);
        assert_eq!(t(IntentLabel::General), Phase::Searching);
    }

    #[test]
    fn test_searching_depends_on_outcome() {
        assert_eq!(
            transition(Phase::Searching, None, SearchOutcome::Found(2), None),
            Phase::Responding
        );
        assert_eq!(
            transition(Phase::Searching, None, SearchOutcome::Found(0), None),
            Phase::Clarifying
        );
        assert_eq!(
            transition(Phase::Searching, None, SearchOutcome::Empty, None),
            Phase::Clarifying
        );
    }

    #[test]
    fn test_responding_ends_only_on_end_condition() {
        assert_eq!(
            transition(Phase::Responding, None, SearchOutcome::NotRun, None),
            Phase::Understanding
        );
        assert_eq!(
            transition(
                Phase::Responding,
                None,
                SearchOutcome::NotRun,
                Some(EndReason::TurnLimit)
            ),
            Phase::Ending
        );
    }

    #[test]
    fn test_ending_is_terminal() {
        assert_eq!(
            transition(
                Phase::Ending,
                Some(IntentLabel::Greeting),
                SearchOutcome::Found(3),
                None
            ),
            Phase::Ending
        );
    }

    #[test]
    fn test_goodbye_always_ends() {
        for from in [Phase::Understanding, Phase::FollowUp] {
            assert_eq!(
                transition(from, Some(IntentLabel::Goodbye), SearchOutcome::NotRun, None),
                Phase::Ending
            );
        }
    }

    #[test]
    fn test_transition_results_are_valid_edges() {
        for from in Phase::ALL {
            if from == Phase::Ending {
                continue;
            }
            for label in IntentLabel::ALL {
                for search in [SearchOutcome::NotRun, SearchOutcome::Found(1), SearchOutcome::Empty] {
                    for end in [None, Some(EndReason::Goodbye)] {
                        let to = transition(from, Some(label), search, end);
                        assert!(
                            is_valid_transition(from, to),
                            "{} -> {} is not an edge",
                            from,
                            to
                        );
                    }
                }
            }
        }
    }

    // ---- invalid edges ----

    #[test]
    fn test_invalid_transitions() {
        assert!(!is_valid_transition(Phase::Ending, Phase::Understanding));
        assert!(!is_valid_transition(Phase::Greeting, Phase::Searching));
        assert!(!is_valid_transition(Phase::Clarifying, Phase::Responding));
        assert!(!is_valid_transition(Phase::Searching, Phase::Ending));
    }

    // ---- end conditions ----

    #[test]
    fn test_end_reason_order() {
        let limits = DialogueConfig::default();
        assert_eq!(
            end_reason(Some(IntentLabel::Goodbye), 30, 9, 9, &limits),
            Some(EndReason::Goodbye)
        );
        assert_eq!(end_reason(None, 21, 9, 9, &limits), Some(EndReason::TurnLimit));
        assert_eq!(end_reason(None, 5, 4, 9, &limits), Some(EndReason::RetryLimit));
        assert_eq!(end_reason(None, 5, 0, 5, &limits), Some(EndReason::ErrorLimit));
    }

    #[test]
    fn test_end_reason_boundaries() {
        let limits = DialogueConfig::default();
        assert_eq!(end_reason(Some(IntentLabel::Question), 20, 3, 4, &limits), None);
        assert_eq!(end_reason(None, 20, 3, 4, &limits), None);
    }
}
