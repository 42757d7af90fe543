//! Keyword, entity, and scope extraction.

use std::sync::LazyLock;

use regex::Regex;

use colloquy_core::types::QueryScope;

// Stop words dropped from keyword extraction
static STOP_WORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "am", "be", "been", "being",
    "have", "has", "had", "do", "does", "did", "will", "would", "shall", "should",
    "may", "might", "must", "can", "could", "i", "me", "my", "we", "our", "you",
    "your", "he", "she", "it", "they", "them", "his", "her", "its", "their",
    "what", "which", "who", "whom", "whose", "this", "that", "these", "those", "of",
    "in", "to", "for", "with", "on", "at", "from", "by", "about", "as", "into",
    "through", "during", "before", "after", "above", "below", "between", "and",
    "but", "or", "not", "no", "so", "if", "then", "than", "too", "very", "just",
    "also", "up", "out", "all", "any", "some", "how", "when", "where", "why",
    "find", "show", "search", "look", "tell", "more", "anything", "everything",
    "something", "nothing", "much", "many", "please", "thanks", "thank", "hi",
    "hello", "hey", "explain", "compare", "difference", "versus", "vs", "there",
    "each", "every", "know", "want", "need", "get", "give", "let", "like",
];

// Words that can start a sentence capitalized without being part of a name
static LEAD_WORDS: &[&str] = &[
    "please", "tell", "show", "find", "who", "what", "where", "when", "which",
    "how", "why", "is", "are", "does", "do", "can", "could", "would", "should",
    "compare", "explain", "list", "search", "look", "give", "hello", "hi", "hey",
    "thanks", "ok", "okay", "and", "or", "the", "about", "contact", "email", "call",
];

// Pronouns that make a short utterance a follow-up to the previous one
static FOLLOW_UP_PRONOUNS: &[&str] = &["it", "that", "this", "them", "those", "these", "they"];

static ALL_SCOPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:all|every|each)\s+(?:of\s+the\s+|the\s+)?([a-z][a-z-]*)").expect("Invalid scope regex")
});

static RANGE_SCOPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\bbetween\s+\S*\d\S*\s+and\s+\S*\d|\bfrom\s+\S*\d\S*\s+(?:to|until|through)\s+\S*\d|\b(?:since|before|after)\s+(?:\d{4}|\d{1,2}/\d{1,2})|\b(?:last|past|next)\s+\d+\s+(?:days?|weeks?|months?|years?)",
    )
    .expect("Invalid scope regex")
});

static TARGET_SPLIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*,\s*(?:and\s+|or\s+)?|\s+(?:and|or|vs\.?|versus|with|to)\s+").expect("Invalid target regex")
});

static COMPARISON_LEAD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^.*?\b(?:compare|comparison\s+of|difference\s+between|differences\s+between|how\s+does)\s+",
    )
    .expect("Invalid comparison regex")
});

static CONJOINED_TAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(.*\b(?:for|in|at|of|about|on|from)\s+)(.+?)([?.!]*)$").expect("Invalid conjunction regex")
});

static CONJUNCTION_SPLIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*,\s*(?:and\s+|or\s+)?|\s+(?:and|or)\s+").expect("Invalid conjunction regex")
});

// Longer pieces are clauses rather than targets
const MAX_TARGET_WORDS: usize = 3;

/// Lowercased content words, in order of first appearance.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    for word in text.split(|c: char| !(c.is_alphanumeric() || c == '-' || c == '\'')) {
        let word = word.trim_matches(|c: char| c == '-' || c == '\'').to_lowercase();
        if word.len() < 3 || STOP_WORDS.contains(&word.as_str()) {
            continue;
        }
        if !keywords.contains(&word) {
            keywords.push(word);
        }
    }
    keywords
}

/// Name-like capitalized bigrams ("Jane Smith").
pub fn extract_entities(text: &str) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut entities: Vec<String> = Vec::new();
    let mut i = 0;
    while i + 1 < words.len() {
        let first = words[i];
        let second = words[i + 1];
        let first_clean = first.trim_matches(|c: char| !c.is_alphabetic());
        let second_clean = second.trim_matches(|c: char| !c.is_alphabetic());
        // A comma or full stop after the first word breaks the name
        let broken = first.ends_with([',', '.', '?', '!', ';', ':']);

        if !broken
            && is_name_word(first_clean)
            && is_name_word(second_clean)
            && !LEAD_WORDS.contains(&first_clean.to_lowercase().as_str())
        {
            let name = format!("{} {}", first_clean, second_clean);
            if !entities.contains(&name) {
                entities.push(name);
            }
            i += 2;
        } else {
            i += 1;
        }
    }
    entities
}

fn is_name_word(word: &str) -> bool {
    let mut chars = word.chars();
    match chars.next() {
        Some(c) if c.is_uppercase() => {
            word.len() >= 2
                && chars.all(|c| c.is_lowercase() || c == '\'' || c == '-')
                && !STOP_WORDS.contains(&word.to_lowercase().as_str())
        }
        _ => false,
    }
}

/// Whether a short utterance refers back to the previous turn by pronoun.
pub fn is_follow_up(text: &str, keywords: &[String]) -> bool {
    if keywords.len() > 1 {
        return false;
    }
    text.split(|c: char| !c.is_alphanumeric())
        .any(|w| FOLLOW_UP_PRONOUNS.contains(&w.to_lowercase().as_str()))
}

/// An "all X" / "every X" phrase: the quantified noun and the byte span of
/// the whole phrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopePhrase {
    pub noun: String,
    pub start: usize,
    pub end: usize,
}

/// Scope of an utterance, plus every quantified phrase in order of appearance.
pub fn detect_scope(text: &str) -> (QueryScope, Vec<ScopePhrase>) {
    let phrases: Vec<ScopePhrase> = ALL_SCOPE_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let noun = caps.get(1)?;
            Some(ScopePhrase {
                noun: noun.as_str().to_lowercase(),
                start: whole.start(),
                end: whole.end(),
            })
        })
        .collect();
    if !phrases.is_empty() {
        return (QueryScope::All, phrases);
    }
    if RANGE_SCOPE_RE.is_match(text) {
        return (QueryScope::Range, phrases);
    }
    (QueryScope::Specific, phrases)
}

/// Targets of a comparison ("PTO and sick leave" -> ["PTO", "sick leave"]).
///
/// Returns an empty list unless at least two targets were found.
pub fn comparison_targets(text: &str) -> Vec<String> {
    let trimmed = text.trim().trim_end_matches(['?', '.', '!']);
    let body = COMPARISON_LEAD_RE.replace(trimmed, "");
    let targets: Vec<String> = TARGET_SPLIT_RE
        .split(&body)
        .map(|t| strip_articles(t.trim()))
        .filter(|t| !t.is_empty())
        .collect();
    if targets.len() >= 2 {
        targets
    } else {
        Vec::new()
    }
}

/// A list of targets closing an utterance: "What is the policy for Berlin
/// and Munich?" splits into the prefix up to "for ", the targets, and the
/// trailing punctuation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConjoinedTargets {
    pub prefix: String,
    pub targets: Vec<String>,
    pub suffix: String,
}

/// Targets joined by "and"/"or"/commas after the last preposition.
///
/// Returns `None` unless at least two targets of at most
/// `MAX_TARGET_WORDS` words each were found.
pub fn conjoined_targets(text: &str) -> Option<ConjoinedTargets> {
    let caps = CONJOINED_TAIL_RE.captures(text.trim())?;
    let prefix = caps.get(1)?.as_str();
    let tail = caps.get(2)?.as_str();
    let suffix = caps.get(3).map_or("", |m| m.as_str());

    let targets: Vec<String> = CONJUNCTION_SPLIT_RE
        .split(tail)
        .map(|t| strip_articles(t.trim()))
        .filter(|t| !t.is_empty())
        .collect();
    if targets.len() < 2
        || targets
            .iter()
            .any(|t| t.split_whitespace().count() > MAX_TARGET_WORDS)
    {
        return None;
    }
    Some(ConjoinedTargets {
        prefix: prefix.to_string(),
        targets,
        suffix: suffix.to_string(),
    })
}

fn strip_articles(text: &str) -> String {
    let mut words: Vec<&str> = text.split_whitespace().collect();
    while let Some(first) = words.first() {
        if matches!(first.to_lowercase().as_str(), "the" | "a" | "an" | "our" | "my") {
            words.remove(0);
        } else {
            break;
        }
    }
    words.join(" ")
}

/// Naive singular form used to match dimension names ("buildings" -> "building").
pub fn singularize(noun: &str) -> String {
    if let Some(stem) = noun.strip_suffix("ies") {
        format!("{}y", stem)
    } else if noun.ends_with("ss") {
        noun.to_string()
    } else if let Some(stem) = noun.strip_suffix('s') {
        stem.to_string()
    } else {
        noun.to_string()
    }
}
