//! Two-tier intent analysis: deterministic patterns, optionally superseded
//! by an external classifier.

use std::sync::Arc;

use tracing::debug;

use colloquy_core::collaborator::{with_timeout, IntentClassifier};
use colloquy_core::config::RouterConfig;
use colloquy_core::types::{
    AnalysisSource, IntentAnalysis, IntentLabel, QueryScope, Role, SubQuery, Turn,
};

use crate::classifier::{apply_verdict, parse_verdict};
use crate::decompose::{decompose, synonym_map};
use crate::extract::{detect_scope, extract_entities, extract_keywords, is_follow_up};
use crate::patterns::match_intent;

/// Stateless utterance analyzer shared by all sessions.
pub struct IntentRouter {
    config: RouterConfig,
    classifier: Option<Arc<dyn IntentClassifier>>,
}

impl IntentRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self {
            config,
            classifier: None,
        }
    }

    /// Attach an external classifier consulted after the pattern pass.
    pub fn with_classifier(mut self, classifier: Arc<dyn IntentClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Analyze an utterance. `recent` is the short analysis window of prior
    /// turns, oldest first.
    ///
    /// When a classifier is attached and answers in time with parseable
    /// output, its verdict supersedes the pattern label. Timeouts and
    /// malformed output fall back to the pattern result.
    pub async fn analyze(&self, utterance: &str, recent: &[Turn]) -> IntentAnalysis {
        let mut analysis = self.analyze_patterns(utterance, recent);
        if utterance.trim().is_empty() {
            return analysis;
        }
        let Some(classifier) = &self.classifier else {
            return analysis;
        };

        let outcome = with_timeout(
            "intent classifier",
            self.config.classifier_timeout_secs,
            classifier.classify(utterance, recent),
        )
        .await
        .and_then(|raw| parse_verdict(&raw));

        match outcome {
            Ok(verdict) => {
                apply_verdict(&mut analysis, verdict, self.config.pattern_confidence);
                analysis.synonyms = synonym_map(&analysis.keywords, &self.config.synonyms);
                debug!(
                    label = %analysis.label,
                    confidence = analysis.confidence,
                    "Classifier verdict applied"
                );
            }
            Err(e) => {
                debug!(error = %e, "Classifier unavailable, using pattern analysis");
            }
        }
        analysis
    }

    /// Pattern-only analysis. Deterministic for a given input.
    pub fn analyze_patterns(&self, utterance: &str, recent: &[Turn]) -> IntentAnalysis {
        let text = utterance.trim();
        if text.is_empty() {
            return IntentAnalysis {
                label: IntentLabel::General,
                confidence: self.config.fallback_confidence,
                keywords: Vec::new(),
                entities: Vec::new(),
                scope: QueryScope::Specific,
                decomposition: Vec::new(),
                synonyms: Default::default(),
                source: AnalysisSource::Patterns,
            };
        }

        let (mut label, mut confidence) = match match_intent(text) {
            Some(label) => (label, self.config.pattern_confidence),
            None => (IntentLabel::General, self.config.fallback_confidence),
        };

        let mut keywords = extract_keywords(text);
        let entities = if matches!(label, IntentLabel::Greeting | IntentLabel::Goodbye | IntentLabel::Help) {
            Vec::new()
        } else {
            extract_entities(text)
        };
        let (scope, phrases) = detect_scope(text);
        let (scope, mut decomposition) = decompose(
            text,
            label,
            scope,
            &phrases,
            &entities,
            &self.config,
        );

        if scope == QueryScope::EntityLookup {
            confidence = self.config.entity_confidence;
            if label == IntentLabel::General {
                label = IntentLabel::Search;
            }
        }

        let seeking = label.is_information_seeking() || label == IntentLabel::General;
        if seeking && decomposition.is_empty() && is_follow_up(text, &keywords) {
            if let Some(inherited) = previous_topic(recent, text) {
                debug!(inherited = ?inherited, "Follow-up inherits previous topic");
                let query = format!("{} {}", inherited.join(" "), keywords.join(" "));
                for kw in inherited {
                    if !keywords.contains(&kw) {
                        keywords.push(kw);
                    }
                }
                decomposition.push(SubQuery {
                    text: query.trim().to_string(),
                    target: None,
                });
            }
        }

        let synonyms = synonym_map(&keywords, &self.config.synonyms);

        IntentAnalysis {
            label,
            confidence,
            keywords,
            entities,
            scope,
            decomposition,
            synonyms,
            source: AnalysisSource::Patterns,
        }
    }
}

/// Keywords of the most recent earlier user turn that had any.
fn previous_topic(recent: &[Turn], current: &str) -> Option<Vec<String>> {
    let mut skipped_current = false;
    for turn in recent.iter().rev().filter(|t| t.role == Role::User) {
        if !skipped_current && turn.text.trim() == current {
            skipped_current = true;
            continue;
        }
        let keywords = extract_keywords(&turn.text);
        if !keywords.is_empty() {
            return Some(keywords);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use colloquy_core::collaborator::CollaboratorError;
    use std::time::Duration;

    fn router() -> IntentRouter {
        IntentRouter::new(RouterConfig::default())
    }

    struct FixedClassifier(String);

    #[async_trait]
    impl IntentClassifier for FixedClassifier {
        async fn classify(&self, _utterance: &str, _recent: &[Turn]) -> Result<String, CollaboratorError> {
            Ok(self.0.clone())
        }
    }

    struct SlowClassifier;

    #[async_trait]
    impl IntentClassifier for SlowClassifier {
        async fn classify(&self, _utterance: &str, _recent: &[Turn]) -> Result<String, CollaboratorError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(r#"{"intent": "goodbye"}"#.to_string())
        }
    }

    struct FailingClassifier;

    #[async_trait]
    impl IntentClassifier for FailingClassifier {
        async fn classify(&self, _utterance: &str, _recent: &[Turn]) -> Result<String, CollaboratorError> {
            Err(CollaboratorError::Failed("model offline".into()))
        }
    }

    // ---- pattern tier ----

    #[test]
    fn test_question_analysis() {
        let a = router().analyze_patterns("What is the vacation policy?", &[]);
        assert_eq!(a.label, IntentLabel::Question);
        assert!((a.confidence - 0.8).abs() < f32::EPSILON);
        assert_eq!(a.keywords, vec!["vacation", "policy"]);
        assert_eq!(a.scope, QueryScope::Specific);
        assert!(a.decomposition.is_empty());
        assert!(a.synonyms.contains_key("vacation"));
        assert_eq!(a.source, AnalysisSource::Patterns);
    }

    #[test]
    fn test_unmatched_is_general_with_fallback_confidence() {
        let a = router().analyze_patterns("parking rules", &[]);
        assert_eq!(a.label, IntentLabel::General);
        assert!((a.confidence - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_whitespace_is_general() {
        let a = router().analyze_patterns("   \t ", &[]);
        assert_eq!(a.label, IntentLabel::General);
        assert!(a.keywords.is_empty());
    }

    #[test]
    fn test_bye_is_goodbye() {
        let a = router().analyze_patterns("bye", &[]);
        assert_eq!(a.label, IntentLabel::Goodbye);
    }

    #[test]
    fn test_entity_lookup() {
        let a = router().analyze_patterns("Who is Jane Smith?", &[]);
        assert_eq!(a.scope, QueryScope::EntityLookup);
        assert!((a.confidence - 0.9).abs() < f32::EPSILON);
        assert_eq!(a.entities, vec!["Jane Smith"]);
        assert_eq!(a.decomposition.len(), 3);
    }

    #[test]
    fn test_bare_name_becomes_search() {
        let a = router().analyze_patterns("Jane Smith", &[]);
        assert_eq!(a.label, IntentLabel::Search);
        assert_eq!(a.scope, QueryScope::EntityLookup);
    }

    #[test]
    fn test_follow_up_inherits_topic() {
        let recent = vec![
            Turn::user("What is the vacation policy?"),
            Turn::assistant("Employees accrue 20 days."),
            Turn::user("tell me more about it"),
        ];
        let a = router().analyze_patterns("tell me more about it", &recent);
        assert_eq!(a.label, IntentLabel::Explanation);
        assert!(a.keywords.contains(&"vacation".to_string()));
        assert_eq!(a.decomposition.len(), 1);
        assert_eq!(a.decomposition[0].text, "vacation policy");
    }

    #[test]
    fn test_follow_up_without_history() {
        let a = router().analyze_patterns("tell me more about it", &[]);
        assert!(a.decomposition.is_empty());
    }

    #[test]
    fn test_all_scope_decomposes_with_dimension() {
        let mut config = RouterConfig::default();
        config
            .dimensions
            .insert("office".into(), vec!["Berlin".into(), "Lisbon".into(), "Austin".into()]);
        let a = IntentRouter::new(config).analyze_patterns("What are the holidays in all offices?", &[]);
        assert_eq!(a.scope, QueryScope::All);
        assert_eq!(a.decomposition.len(), 3);
        assert_eq!(a.decomposition[2].text, "What are the holidays in the Austin office?");
    }

    #[test]
    fn test_later_all_phrase_names_dimension() {
        let mut config = RouterConfig::default();
        config
            .dimensions
            .insert("building".into(), vec!["North".into(), "South".into()]);
        let a = IntentRouter::new(config).analyze_patterns("Show all AP models in all buildings", &[]);
        assert_eq!(a.scope, QueryScope::All);
        assert_eq!(a.decomposition.len(), 2);
        assert_eq!(a.decomposition[0].text, "Show all AP models in the North building");
        assert_eq!(a.decomposition[1].target.as_deref(), Some("South"));
    }

    #[test]
    fn test_question_naming_two_targets_decomposes() {
        let a = router().analyze_patterns("What is the vacation policy for Berlin and Munich?", &[]);
        assert_eq!(a.label, IntentLabel::Question);
        assert_eq!(a.scope, QueryScope::Specific);
        let targets: Vec<Option<&str>> = a.decomposition.iter().map(|q| q.target.as_deref()).collect();
        assert_eq!(targets, vec![Some("Berlin"), Some("Munich")]);
    }

    // ---- classifier tier ----

    #[tokio::test]
    async fn test_classifier_supersedes_patterns() {
        let r = router().with_classifier(Arc::new(FixedClassifier(
            r#"{"intent": "search", "confidence": 0.95}"#.into(),
        )));
        let a = r.analyze("parking rules", &[]).await;
        assert_eq!(a.label, IntentLabel::Search);
        assert!((a.confidence - 0.95).abs() < 1e-6);
        assert_eq!(a.source, AnalysisSource::Classifier);
    }

    #[tokio::test]
    async fn test_classifier_malformed_falls_back() {
        let r = router().with_classifier(Arc::new(FixedClassifier("not json".into())));
        let a = r.analyze("What is the vacation policy?", &[]).await;
        assert_eq!(a.label, IntentLabel::Question);
        assert_eq!(a.source, AnalysisSource::Patterns);
    }

    #[tokio::test]
    async fn test_classifier_timeout_falls_back() {
        let mut config = RouterConfig::default();
        config.classifier_timeout_secs = 0;
        let r = IntentRouter::new(config).with_classifier(Arc::new(SlowClassifier));
        let a = r.analyze("What is the vacation policy?", &[]).await;
        assert_eq!(a.label, IntentLabel::Question);
        assert_eq!(a.source, AnalysisSource::Patterns);
    }

    #[tokio::test]
    async fn test_classifier_error_falls_back() {
        let r = router().with_classifier(Arc::new(FailingClassifier));
        let a = r.analyze("bye", &[]).await;
        assert_eq!(a.label, IntentLabel::Goodbye);
    }

    #[tokio::test]
    async fn test_classifier_skipped_for_empty_input() {
        let r = router().with_classifier(Arc::new(FixedClassifier(r#"{"intent": "help"}"#.into())));
        let a = r.analyze("  ", &[]).await;
        assert_eq!(a.label, IntentLabel::General);
    }
}
