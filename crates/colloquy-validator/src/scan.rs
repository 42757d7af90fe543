//! Suspicious-content scan for retrieved text.

use std::sync::LazyLock;

use regex::Regex;

use colloquy_core::types::ValidationFlag;

/// Chunks with fewer words than this are flagged as too short.
pub const MIN_WORDS: usize = 5;

struct SuspiciousPatterns {
    placeholder: Vec<Regex>,
    boilerplate: Vec<Regex>,
    contradictory: Vec<Regex>,
}

static SUSPICIOUS_PATTERNS: LazyLock<SuspiciousPatterns> = LazyLock::new(|| {
    let mk = |pats: &[&str]| -> Vec<Regex> {
        pats.iter()
            .map(|p| Regex::new(p).expect("Invalid suspicious-content regex"))
            .collect()
    };

    SuspiciousPatterns {
        placeholder: mk(&[
            r"(?i)\blorem\s+ipsum\b",
            r"\b(?:TODO|TBD|FIXME|XXX)\b",
            r"(?i)\[(?:insert|placeholder|add|tbd)[^\]]*\]",
            r"\{\{[^}]*\}\}",
            r"(?i)<(?:placeholder|insert)[^>]*>",
            r"(?i)\bcoming\s+soon\b",
        ]),
        boilerplate: mk(&[
            r"(?i)\ball\s+rights\s+reserved\b",
            r"(?i)\bcookie\s+(?:policy|settings|preferences)\b",
            r"(?i)\bclick\s+here\b",
            r"(?i)\bsubscribe\s+to\s+(?:our|the)\s+newsletter\b",
            r"(?i)\bterms\s+(?:of|and)\s+(?:service|use|conditions)\b",
            r"(?i)\bpage\s+\d+\s+of\s+\d+\b",
            r"(?i)\btable\s+of\s+contents\b",
            r"(?i)\bprivacy\s+policy\b.*\bcontact\s+us\b",
        ]),
        contradictory: mk(&[
            r"(?i)\b(?:outdated|obsolete|deprecated|superseded)\b",
            r"(?i)\bno\s+longer\s+(?:valid|applies|accurate|in\s+effect)\b",
            r"(?i)\b(?:draft|unverified|unconfirmed)\b",
            r"(?i)\bmay\s+(?:be|contain)\s+(?:incorrect|inaccurate|errors)\b",
            r"(?i)\bconflicting\s+information\b",
        ]),
    }
});

/// Flags raised by the suspicious-content scan, in a fixed order.
pub fn scan_content(content: &str) -> Vec<ValidationFlag> {
    let pats = &*SUSPICIOUS_PATTERNS;
    let mut flags = Vec::new();

    if pats.placeholder.iter().any(|re| re.is_match(content)) {
        flags.push(ValidationFlag::Placeholder);
    }
    if pats.boilerplate.iter().any(|re| re.is_match(content)) {
        flags.push(ValidationFlag::Boilerplate);
    }
    if pats.contradictory.iter().any(|re| re.is_match(content)) {
        flags.push(ValidationFlag::ContradictoryMarker);
    }
    if content.split_whitespace().count() < MIN_WORDS {
        flags.push(ValidationFlag::TooShort);
    }
    flags
}

/// Pattern component of the quality score: 1.0 for clean text, reduced by
/// a fixed penalty per flag, floored at 0.
pub fn pattern_component(flags: &[ValidationFlag]) -> f32 {
    let penalty: f32 = flags
        .iter()
        .map(|flag| match flag {
            ValidationFlag::Placeholder => 0.6,
            ValidationFlag::Boilerplate => 0.4,
            ValidationFlag::ContradictoryMarker => 0.5,
            ValidationFlag::TooShort => 0.3,
            ValidationFlag::Conflicting => 0.0,
        })
        .sum();
    (1.0 - penalty).max(0.0)
}
