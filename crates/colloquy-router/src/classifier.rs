//! Parsing of external intent classifier output.

use serde::Deserialize;

use colloquy_core::collaborator::CollaboratorError;
use colloquy_core::types::{AnalysisSource, IntentAnalysis, IntentLabel};

#[derive(Debug, Deserialize)]
struct RawVerdict {
    intent: String,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    entities: Vec<String>,
}

/// Structured result of the external classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierVerdict {
    pub label: IntentLabel,
    pub confidence: Option<f32>,
    pub keywords: Vec<String>,
    pub entities: Vec<String>,
}

/// Parse classifier output. Accepts a bare JSON object or one wrapped in a
/// Markdown code fence.
pub fn parse_verdict(raw: &str) -> Result<ClassifierVerdict, CollaboratorError> {
    let body = strip_code_fence(raw);
    let parsed: RawVerdict =
        serde_json::from_str(body).map_err(|e| CollaboratorError::Malformed(e.to_string()))?;

    let label = IntentLabel::parse(&parsed.intent).ok_or_else(|| {
        CollaboratorError::Malformed(format!("unknown intent label '{}'", parsed.intent))
    })?;
    let confidence = match parsed.confidence {
        Some(c) if c.is_finite() => Some(c.clamp(0.0, 1.0)),
        Some(_) => {
            return Err(CollaboratorError::Malformed(
                "confidence is not a finite number".to_string(),
            ))
        }
        None => None,
    };

    Ok(ClassifierVerdict {
        label,
        confidence,
        keywords: parsed
            .keywords
            .into_iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect(),
        entities: parsed
            .entities
            .into_iter()
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .collect(),
    })
}

/// Overlay a verdict on a pattern-based analysis.
///
/// The label always comes from the verdict; keywords and entities only when
/// the verdict supplied any.
pub fn apply_verdict(analysis: &mut IntentAnalysis, verdict: ClassifierVerdict, default_confidence: f32) {
    analysis.label = verdict.label;
    analysis.confidence = verdict.confidence.unwrap_or(default_confidence);
    if !verdict.keywords.is_empty() {
        analysis.keywords = verdict.keywords;
    }
    if !verdict.entities.is_empty() {
        analysis.entities = verdict.entities;
    }
    if !(analysis.label.is_information_seeking() || analysis.label == IntentLabel::General) {
        analysis.decomposition.clear();
    }
    analysis.source = AnalysisSource::Classifier;
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_core::types::{QueryScope, SubQuery};
    use std::collections::BTreeMap;

    fn pattern_analysis() -> IntentAnalysis {
        IntentAnalysis {
            label: IntentLabel::General,
            confidence: 0.5,
            keywords: vec!["parking".into()],
            entities: vec![],
            scope: QueryScope::Specific,
            decomposition: vec![SubQuery {
                text: "parking".into(),
                target: None,
            }],
            synonyms: BTreeMap::new(),
            source: AnalysisSource::Patterns,
        }
    }

    #[test]
    fn test_parse_full_verdict() {
        let verdict = parse_verdict(
            r#"{"intent": "question", "confidence": 0.93, "keywords": [" Parking "], "entities": ["North Campus"]}"#,
        )
        .unwrap();
        assert_eq!(verdict.label, IntentLabel::Question);
        assert_eq!(verdict.confidence, Some(0.93));
        assert_eq!(verdict.keywords, vec!["parking"]);
        assert_eq!(verdict.entities, vec!["North Campus"]);
    }

    #[test]
    fn test_parse_fenced_verdict() {
        let verdict = parse_verdict("```json\n{\"intent\": \"goodbye\"}\n```").unwrap();
        assert_eq!(verdict.label, IntentLabel::Goodbye);
        assert_eq!(verdict.confidence, None);
    }

    #[test]
    fn test_parse_clamps_confidence() {
        let verdict = parse_verdict(r#"{"intent": "help", "confidence": 3.5}"#).unwrap();
        assert_eq!(verdict.confidence, Some(1.0));
    }

    #[test]
    fn test_parse_rejects_unknown_label() {
        let err = parse_verdict(r#"{"intent": "weather"}"#).unwrap_err();
        assert!(matches!(err, CollaboratorError::Malformed(_)));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_verdict("I think the user wants help").is_err());
        assert!(parse_verdict(r#"{"confidence": 0.9}"#).is_err());
    }

    #[test]
    fn test_apply_verdict_supersedes_label() {
        let mut analysis = pattern_analysis();
        let verdict = ClassifierVerdict {
            label: IntentLabel::Search,
            confidence: None,
            keywords: vec![],
            entities: vec![],
        };
        apply_verdict(&mut analysis, verdict, 0.8);
        assert_eq!(analysis.label, IntentLabel::Search);
        assert_eq!(analysis.confidence, 0.8);
        assert_eq!(analysis.keywords, vec!["parking"]);
        assert_eq!(analysis.decomposition.len(), 1);
        assert_eq!(analysis.source, AnalysisSource::Classifier);
    }

    #[test]
    fn test_apply_verdict_goodbye_clears_plan() {
        let mut analysis = pattern_analysis();
        let verdict = ClassifierVerdict {
            label: IntentLabel::Goodbye,
            confidence: Some(0.99),
            keywords: vec![],
            entities: vec![],
        };
        apply_verdict(&mut analysis, verdict, 0.8);
        assert!(analysis.decomposition.is_empty());
        assert_eq!(analysis.confidence, 0.99);
    }
}
