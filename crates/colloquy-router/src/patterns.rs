//! Deterministic intent patterns.

use std::sync::LazyLock;

use regex::Regex;

use colloquy_core::types::IntentLabel;

// =============================================================================
// Compiled regex sets (compiled once, reused across calls)
// =============================================================================

struct IntentPatterns {
    goodbye: Vec<Regex>,
    help: Vec<Regex>,
    comparison: Vec<Regex>,
    explanation: Vec<Regex>,
    search: Vec<Regex>,
    greeting: Vec<Regex>,
    question: Vec<Regex>,
}

static INTENT_PATTERNS: LazyLock<IntentPatterns> = LazyLock::new(|| {
    let mk = |pats: &[&str]| -> Vec<Regex> {
        pats.iter()
            .map(|p| Regex::new(p).expect("Invalid intent regex"))
            .collect()
    };

    IntentPatterns {
        goodbye: mk(&[
            r"(?i)^\s*(?:bye|goodbye|good\s*bye|bye\s*bye|farewell|cya|see\s+ya|see\s+you)\b",
            r"(?i)\b(?:bye|goodbye)[\s!.]*$",
            r"(?i)^\s*(?:thanks|thank\s+you)[\s,!.]*(?:that'?s\s+all|bye|goodbye)\b",
            r"(?i)^\s*that'?s\s+all(?:\s+for\s+(?:now|today))?[\s!.]*$",
            r"(?i)^\s*(?:exit|quit|end\s+(?:the\s+)?(?:chat|session|conversation))[\s!.]*$",
        ]),
        help: mk(&[
            r"(?i)^\s*help[\s!?.]*$",
            r"(?i)\bwhat\s+can\s+you\s+do\b",
            r"(?i)\bhow\s+do\s+i\s+use\s+(?:you|this)\b",
            r"(?i)\bwhat\s+are\s+your\s+(?:features|capabilities)\b",
            r"(?i)^\s*(?:i\s+need\s+)?help\s+(?:me\s+)?(?:with\s+)?(?:using\s+)?(?:you|this)\b",
        ]),
        comparison: mk(&[
            r"(?i)\bcompare\b",
            r"(?i)\bcomparison\b",
            r"(?i)\bdifference\s+between\b",
            r"(?i)\bdiffer(?:s|ence)?\s+from\b",
            r"(?i)\b(?:vs\.?|versus)\b",
            r"(?i)\bbetter\s+than\b",
        ]),
        explanation: mk(&[
            r"(?i)\bexplain\b",
            r"(?i)^\s*why\b",
            r"(?i)\bhow\s+does\b",
            r"(?i)\bwhat\s+does\s+.+\s+mean\b",
            r"(?i)\belaborate\b",
            r"(?i)\btell\s+me\s+more\b",
            r"(?i)\bmore\s+details?\b",
        ]),
        search: mk(&[
            r"(?i)\bfind\b",
            r"(?i)\bsearch\b",
            r"(?i)\blook\s+(?:up|for)\b",
            r"(?i)\bshow\s+me\b",
            r"(?i)^\s*list\b",
            r"(?i)\bwhere\s+can\s+i\s+(?:find|get)\b",
            r"(?i)\bany(?:thing)?\s+(?:about|on)\b",
        ]),
        greeting: mk(&[
            r"(?i)^\s*(?:hi|hello|hey|howdy|greetings|hiya|good\s+(?:morning|afternoon|evening))(?:\s+there)?[\s!.,]*(?:\w+)?[\s!.,]*$",
        ]),
        question: mk(&[
            r"\?\s*$",
            r"(?i)^\s*(?:what|who|whom|whose|when|where|which|how|is|are|was|were|can|could|does|do|did|should|will|would|may)\b",
        ]),
    }
});

/// Match an utterance against the pattern table.
///
/// Checked in order: goodbye, help, comparison, explanation, search,
/// greeting, question. Returns `None` when nothing matched.
pub fn match_intent(text: &str) -> Option<IntentLabel> {
    let pats = &*INTENT_PATTERNS;
    let ordered: [(&Vec<Regex>, IntentLabel); 7] = [
        (&pats.goodbye, IntentLabel::Goodbye),
        (&pats.help, IntentLabel::Help),
        (&pats.comparison, IntentLabel::Comparison),
        (&pats.explanation, IntentLabel::Explanation),
        (&pats.search, IntentLabel::Search),
        (&pats.greeting, IntentLabel::Greeting),
        (&pats.question, IntentLabel::Question),
    ];

    ordered
        .iter()
        .find(|(res, _)| res.iter().any(|re| re.is_match(text)))
        .map(|(_, label)| *label)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(text: &str) -> Option<IntentLabel> {
        match_intent(text)
    }

    // ---- goodbye ----

    #[test]
    fn test_bye_is_goodbye() {
        assert_eq!(label("bye"), Some(IntentLabel::Goodbye));
        assert_eq!(label("Goodbye!"), Some(IntentLabel::Goodbye));
        assert_eq!(label("ok thanks, bye"), Some(IntentLabel::Goodbye));
        assert_eq!(label("Thanks, that's all"), Some(IntentLabel::Goodbye));
        assert_eq!(label("see you"), Some(IntentLabel::Goodbye));
    }

    #[test]
    fn test_goodbye_word_inside_question_is_not_goodbye() {
        assert_eq!(
            label("What is the goodbye lunch budget?"),
            Some(IntentLabel::Question)
        );
    }

    // ---- greeting ----

    #[test]
    fn test_plain_greetings() {
        assert_eq!(label("hello"), Some(IntentLabel::Greeting));
        assert_eq!(label("Hi there!"), Some(IntentLabel::Greeting));
        assert_eq!(label("good morning"), Some(IntentLabel::Greeting));
    }

    #[test]
    fn test_greeting_with_question_is_question() {
        assert_eq!(
            label("Hello, what is the vacation policy?"),
            Some(IntentLabel::Question)
        );
    }

    // ---- help ----

    #[test]
    fn test_help() {
        assert_eq!(label("help"), Some(IntentLabel::Help));
        assert_eq!(label("What can you do?"), Some(IntentLabel::Help));
        assert_eq!(label("how do I use this"), Some(IntentLabel::Help));
    }

    #[test]
    fn test_help_finding_something_is_not_help() {
        assert_eq!(
            label("can you help me find the expense form"),
            Some(IntentLabel::Search)
        );
    }

    // ---- information seeking ----

    #[test]
    fn test_question() {
        assert_eq!(
            label("What is the vacation policy?"),
            Some(IntentLabel::Question)
        );
        assert_eq!(label("who approves expenses"), Some(IntentLabel::Question));
    }

    #[test]
    fn test_comparison() {
        assert_eq!(
            label("What is the difference between PTO and sick leave?"),
            Some(IntentLabel::Comparison)
        );
        assert_eq!(label("Mac vs Windows laptops"), Some(IntentLabel::Comparison));
    }

    #[test]
    fn test_explanation() {
        assert_eq!(
            label("Explain the remote work policy"),
            Some(IntentLabel::Explanation)
        );
        assert_eq!(label("tell me more about it"), Some(IntentLabel::Explanation));
        assert_eq!(label("Why was my claim rejected?"), Some(IntentLabel::Explanation));
    }

    #[test]
    fn test_search() {
        assert_eq!(label("find the travel form"), Some(IntentLabel::Search));
        assert_eq!(label("show me the org chart"), Some(IntentLabel::Search));
    }

    #[test]
    fn test_no_match() {
        assert_eq!(label("parking rules"), None);
        assert_eq!(label(""), None);
        assert_eq!(label("   "), None);
    }
}
