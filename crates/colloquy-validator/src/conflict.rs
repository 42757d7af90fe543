//! Pairwise contradiction detection between accepted chunks.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use colloquy_core::types::ContextChunk;

static QUANTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d+(?:[.,]\d+)?)\s*(%|[a-z]{3,})").expect("Invalid quantity regex")
});

static SENTENCE_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?;]+\s*").expect("Invalid sentence regex"));

static NEGATIONS: &[&str] = &[
    "not", "no", "never", "cannot", "can't", "isn't", "aren't", "doesn't", "don't",
    "won't", "wasn't", "weren't", "prohibited", "forbidden", "without",
];

// Words ignored when comparing sentences and quantity units
static FILLER: &[&str] = &[
    "the", "and", "for", "are", "was", "were", "with", "that", "this", "from", "per",
    "has", "have", "had", "will", "shall", "may", "can", "all", "any", "each", "its",
    "their", "our", "your", "than", "more", "less", "after", "before", "into", "onto",
    "also", "only", "until", "about",
];

/// Minimum share of content words two sentences must have in common before a
/// negation mismatch counts as a contradiction.
const NEGATION_OVERLAP: f32 = 0.6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Same unit, disjoint numbers ("20 days" vs "15 days").
    Numeric { unit: String },
    /// Near-identical statements where only one is negated.
    Negation,
}

/// A contradiction between two accepted chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub first: String,
    pub second: String,
    pub kind: ConflictKind,
    pub detail: String,
}

/// Compare every pair of chunks and report contradictions. Each pair yields
/// at most one conflict; numeric contradictions are checked first.
pub fn detect_conflicts(chunks: &[ContextChunk]) -> Vec<Conflict> {
    let quantities: Vec<BTreeMap<String, BTreeSet<String>>> =
        chunks.iter().map(|c| quantities(&c.content)).collect();
    let sentences: Vec<Vec<Sentence>> = chunks.iter().map(|c| sentences(&c.content)).collect();

    let mut conflicts = Vec::new();
    for i in 0..chunks.len() {
        for j in (i + 1)..chunks.len() {
            if let Some(conflict) = numeric_conflict(&chunks[i], &chunks[j], &quantities[i], &quantities[j]) {
                conflicts.push(conflict);
            } else if let Some(conflict) = negation_conflict(&chunks[i], &chunks[j], &sentences[i], &sentences[j]) {
                conflicts.push(conflict);
            }
        }
    }
    conflicts
}

fn numeric_conflict(
    a: &ContextChunk,
    b: &ContextChunk,
    qa: &BTreeMap<String, BTreeSet<String>>,
    qb: &BTreeMap<String, BTreeSet<String>>,
) -> Option<Conflict> {
    for (unit, numbers_a) in qa {
        let Some(numbers_b) = qb.get(unit) else {
            continue;
        };
        if numbers_a.is_disjoint(numbers_b) {
            return Some(Conflict {
                first: a.source_id.clone(),
                second: b.source_id.clone(),
                kind: ConflictKind::Numeric { unit: unit.clone() },
                detail: format!(
                    "{} says {} {}, {} says {} {}",
                    a.source_id,
                    join(numbers_a),
                    unit,
                    b.source_id,
                    join(numbers_b),
                    unit
                ),
            });
        }
    }
    None
}

fn negation_conflict(
    a: &ContextChunk,
    b: &ContextChunk,
    sa: &[Sentence],
    sb: &[Sentence],
) -> Option<Conflict> {
    for left in sa {
        for right in sb {
            if left.negated == right.negated {
                continue;
            }
            if overlap(&left.words, &right.words) >= NEGATION_OVERLAP {
                return Some(Conflict {
                    first: a.source_id.clone(),
                    second: b.source_id.clone(),
                    kind: ConflictKind::Negation,
                    detail: format!("\"{}\" vs \"{}\"", left.text, right.text),
                });
            }
        }
    }
    None
}

fn quantities(text: &str) -> BTreeMap<String, BTreeSet<String>> {
    let mut map: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for caps in QUANTITY_RE.captures_iter(text) {
        let (Some(number), Some(unit)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let unit = unit.as_str().to_lowercase();
        if FILLER.contains(&unit.as_str()) || NEGATIONS.contains(&unit.as_str()) {
            continue;
        }
        let number = number.as_str().replace(',', ".");
        map.entry(unit).or_default().insert(number);
    }
    map
}

struct Sentence {
    text: String,
    words: BTreeSet<String>,
    negated: bool,
}

fn sentences(text: &str) -> Vec<Sentence> {
    SENTENCE_SPLIT_RE
        .split(text)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            let lowered: Vec<String> = s
                .split(|c: char| !(c.is_alphanumeric() || c == '\''))
                .filter(|w| !w.is_empty())
                .map(|w| w.to_lowercase())
                .collect();
            let negated = lowered.iter().any(|w| NEGATIONS.contains(&w.as_str()));
            let words = lowered
                .into_iter()
                .filter(|w| w.len() > 2 && !FILLER.contains(&w.as_str()) && !NEGATIONS.contains(&w.as_str()))
                .collect();
            Sentence {
                text: s.to_string(),
                words,
                negated,
            }
        })
        .collect()
}

/// Share of the smaller word set found in the larger one.
fn overlap(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f32 {
    let smaller = a.len().min(b.len());
    if smaller < 2 {
        return 0.0;
    }
    a.intersection(b).count() as f32 / smaller as f32
}

fn join(numbers: &BTreeSet<String>) -> String {
    numbers.iter().cloned().collect::<Vec<_>>().join("/")
}
