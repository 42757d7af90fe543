//! Eviction and retrieval scoring.

use colloquy_core::types::{MemoryItem, Timestamp};

/// Recency-weighted relevance: `relevance * 0.5^(age / half_life)`.
///
/// A zero half-life disables decay. Items stamped in the future count as
/// brand new.
pub fn eviction_score(item: &MemoryItem, now: Timestamp, half_life_secs: u64) -> f32 {
    if half_life_secs == 0 {
        return item.relevance;
    }
    let age = now.secs_since(item.inserted_at) as f64;
    let decay = 0.5_f64.powf(age / half_life_secs as f64);
    (item.relevance as f64 * decay) as f32
}

/// Fraction of the query's terms that appear in `content`.
///
/// An empty query matches everything with overlap 1.0.
pub fn keyword_overlap(query: &str, content: &str) -> f32 {
    let terms = terms(query);
    if terms.is_empty() {
        return 1.0;
    }
    let haystack = terms_of_content(content);
    let hits = terms.iter().filter(|t| haystack.contains(t)).count();
    hits as f32 / terms.len() as f32
}

/// Canonical form of a query used as a cache key: lowercase, single spaces,
/// trailing punctuation removed.
pub fn normalize_query(query: &str) -> String {
    let collapsed = query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    collapsed
        .trim_end_matches(|c: char| c.is_ascii_punctuation())
        .to_string()
}

fn terms(text: &str) -> Vec<String> {
    let mut out: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(|w| w.to_lowercase())
        .collect();
    out.sort();
    out.dedup();
    out
}

fn terms_of_content(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}
