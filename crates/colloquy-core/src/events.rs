use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{
    EndReason, ErrorKind, IntentLabel, Phase, Role, SessionSummary, Timestamp,
};

/// Immutable events published on a session's output channel.
///
/// Events are buffered while a turn is being processed and only published
/// once the turn commits, so subscribers never observe a rolled-back turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum SessionEvent {
    /// A session was created.
    Started {
        session_id: String,
        conversation_id: Uuid,
        timestamp: Timestamp,
    },

    /// A turn was appended to the session history.
    TurnAppended {
        session_id: String,
        turn_id: Uuid,
        role: Role,
        text: String,
        timestamp: Timestamp,
    },

    /// The router classified a user utterance.
    IntentClassified {
        session_id: String,
        label: IntentLabel,
        confidence: f32,
        timestamp: Timestamp,
    },

    /// The dialogue controller moved between phases.
    PhaseChanged {
        session_id: String,
        from: Phase,
        to: Phase,
        timestamp: Timestamp,
    },

    /// Retrieved context went through validation.
    ContextValidated {
        session_id: String,
        retrieved: usize,
        accepted: usize,
        conflicts: usize,
        timestamp: Timestamp,
    },

    /// A recoverable error was appended to the error log.
    ErrorRecorded {
        session_id: String,
        kind: ErrorKind,
        message: String,
        timestamp: Timestamp,
    },

    /// The session ended and its summary was produced.
    Ended {
        session_id: String,
        reason: EndReason,
        summary: SessionSummary,
        timestamp: Timestamp,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> &str {
        match self {
            SessionEvent::Started { session_id, .. }
            | SessionEvent::TurnAppended { session_id, .. }
            | SessionEvent::IntentClassified { session_id, .. }
            | SessionEvent::PhaseChanged { session_id, .. }
            | SessionEvent::ContextValidated { session_id, .. }
            | SessionEvent::ErrorRecorded { session_id, .. }
            | SessionEvent::Ended { session_id, .. } => session_id,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        match self {
            SessionEvent::Started { timestamp, .. }
            | SessionEvent::TurnAppended { timestamp, .. }
            | SessionEvent::IntentClassified { timestamp, .. }
            | SessionEvent::PhaseChanged { timestamp, .. }
            | SessionEvent::ContextValidated { timestamp, .. }
            | SessionEvent::ErrorRecorded { timestamp, .. }
            | SessionEvent::Ended { timestamp, .. } => *timestamp,
        }
    }

    /// Returns a short event name for logging.
    pub fn event_name(&self) -> &'static str {
        match self {
            SessionEvent::Started { .. } => "session_started",
            SessionEvent::TurnAppended { .. } => "turn_appended",
            SessionEvent::IntentClassified { .. } => "intent_classified",
            SessionEvent::PhaseChanged { .. } => "phase_changed",
            SessionEvent::ContextValidated { .. } => "context_validated",
            SessionEvent::ErrorRecorded { .. } => "error_recorded",
            SessionEvent::Ended { .. } => "session_ended",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_accessors() {
        let ts = Timestamp(1_700_000_000);
        let event = SessionEvent::PhaseChanged {
            session_id: "abc".into(),
            from: Phase::Understanding,
            to: Phase::Searching,
            timestamp: ts,
        };
        assert_eq!(event.session_id(), "abc");
        assert_eq!(event.timestamp(), ts);
        assert_eq!(event.event_name(), "phase_changed");
    }

    #[test]
    fn test_event_serializes_with_variant_tag() {
        let event = SessionEvent::ErrorRecorded {
            session_id: "abc".into(),
            kind: ErrorKind::CollaboratorTimeout,
            message: "retrieval timed out".into(),
            timestamp: Timestamp(0),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("ErrorRecorded"));
        assert!(json.contains("collaborator_timeout"));
        let back: SessionEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
