use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ColloquyError, Result};

/// Top-level configuration for the Colloquy orchestrator.
///
/// Loaded from `~/.colloquy/config.toml` by default. Each section corresponds
/// to one component of the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColloquyConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub dialogue: DialogueConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub validator: ValidatorConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub collaborators: CollaboratorConfig,
}

impl ColloquyConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ColloquyConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| ColloquyError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Dialogue controller limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogueConfig {
    /// Sessions are forced to end once `turn_count` exceeds this.
    pub max_turns: u32,
    /// Sessions end once consecutive failed searches exceed this.
    pub max_retries: u32,
    /// Recoverable errors tolerated before the session is forced to end.
    pub max_errors: usize,
    /// Number of error records kept per session.
    pub error_log_capacity: usize,
    /// Number of turns retained in session history.
    pub history_window: usize,
    /// Number of recent turns handed to the intent router.
    pub analysis_window: usize,
    /// Longest accepted user message, in characters.
    pub max_message_chars: usize,
    /// Number of topics remembered per session.
    pub topics_capacity: usize,
    /// `top_k` passed to the retrieval collaborator per sub-query.
    pub search_top_k: usize,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            max_turns: 20,
            max_retries: 3,
            max_errors: 5,
            error_log_capacity: 20,
            history_window: 50,
            analysis_window: 4,
            max_message_chars: 4000,
            topics_capacity: 10,
            search_top_k: 8,
        }
    }
}

/// Session lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Idle time after which a session is swept.
    pub idle_timeout_minutes: u32,
    /// Seconds between periodic sweeps.
    pub sweep_interval_secs: u64,
    /// Capacity of each per-session event channel.
    pub event_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_minutes: 30,
            sweep_interval_secs: 60,
            event_buffer: 64,
        }
    }
}

/// Intent and query router configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Confidence assigned when at least one pattern matched.
    pub pattern_confidence: f32,
    /// Confidence assigned when no pattern matched.
    pub fallback_confidence: f32,
    /// Confidence assigned to entity lookups.
    pub entity_confidence: f32,
    /// Deadline for the external intent classifier.
    pub classifier_timeout_secs: u64,
    /// Domain dictionary: term -> synonyms.
    pub synonyms: BTreeMap<String, Vec<String>>,
    /// Enumerable dimensions used for "all X" decomposition: dimension -> values.
    pub dimensions: BTreeMap<String, Vec<String>>,
    /// Terms appended to a name for the role query variant.
    pub role_terms: Vec<String>,
    /// Terms appended to a name for the department query variant.
    pub department_terms: Vec<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        let synonyms = [
            ("vacation", vec!["pto", "leave", "time off", "holiday"]),
            ("policy", vec!["guideline", "rule", "procedure"]),
            ("salary", vec!["pay", "compensation", "wage"]),
            ("manager", vec!["supervisor", "lead", "boss"]),
            ("laptop", vec!["computer", "notebook"]),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.into_iter().map(String::from).collect()))
        .collect();

        Self {
            pattern_confidence: 0.8,
            fallback_confidence: 0.5,
            entity_confidence: 0.9,
            classifier_timeout_secs: 5,
            synonyms,
            dimensions: BTreeMap::new(),
            role_terms: vec!["role".into(), "title".into(), "position".into()],
            department_terms: vec!["department".into(), "team".into()],
        }
    }
}

/// Context validator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Chunks scoring below this are dropped.
    pub threshold: f32,
    /// Maximum number of accepted chunks.
    pub max_accepted: usize,
    /// Weight of the retrieval score.
    pub raw_weight: f32,
    /// Weight of the suspicious-content component.
    pub pattern_weight: f32,
    /// Weight of the external judge, when one answered.
    pub external_weight: f32,
    /// Deadline for the external judge.
    pub external_timeout_secs: u64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            max_accepted: 4,
            raw_weight: 0.6,
            pattern_weight: 0.4,
            external_weight: 0.3,
            external_timeout_secs: 5,
        }
    }
}

/// Tiered memory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub short_term_capacity: usize,
    pub working_capacity: usize,
    pub long_term_capacity: usize,
    pub tool_cache_capacity: usize,
    /// Lifetime of a ToolCache entry.
    pub tool_cache_ttl_secs: u64,
    /// Age at which an item's recency weight halves.
    pub recency_half_life_secs: u64,
    /// Working items at or above this relevance are promoted at session end.
    pub promotion_threshold: f32,
    /// Working items recalled into each generation prompt.
    pub recall_limit: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            short_term_capacity: 20,
            working_capacity: 50,
            long_term_capacity: 100,
            tool_cache_capacity: 10,
            tool_cache_ttl_secs: 300,
            recency_half_life_secs: 900,
            promotion_threshold: 0.8,
            recall_limit: 3,
        }
    }
}

/// Deadlines and generation parameters for external collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollaboratorConfig {
    pub retrieval_timeout_secs: u64,
    pub generation_timeout_secs: u64,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            retrieval_timeout_secs: 10,
            generation_timeout_secs: 15,
            max_tokens: 512,
            temperature: 0.2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = ColloquyConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.dialogue.max_turns, 20);
        assert_eq!(config.dialogue.max_errors, 5);
        assert_eq!(config.dialogue.history_window, 50);
        assert_eq!(config.session.idle_timeout_minutes, 30);
        assert!((config.validator.threshold - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.validator.max_accepted, 4);
        assert_eq!(config.memory.tool_cache_ttl_secs, 300);
        assert!(config.router.synonyms.contains_key("vacation"));
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
[general]
log_level = "debug"

[dialogue]
max_turns = 10
max_retries = 2

[router]
classifier_timeout_secs = 2

[router.dimensions]
building = ["North", "South", "East"]

[validator]
threshold = 0.6
max_accepted = 3
"#;
        let file = create_temp_config(content);
        let config = ColloquyConfig::load(file.path()).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.dialogue.max_turns, 10);
        assert_eq!(config.dialogue.max_retries, 2);
        assert_eq!(config.router.classifier_timeout_secs, 2);
        assert_eq!(config.router.dimensions["building"].len(), 3);
        assert_eq!(config.validator.max_accepted, 3);
        // Unspecified keys keep their defaults
        assert_eq!(config.dialogue.max_errors, 5);
        assert_eq!(config.memory.working_capacity, 50);
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let file = create_temp_config("[session]\nidle_timeout_minutes = 5\n");
        let config = ColloquyConfig::load(file.path()).unwrap();
        assert_eq!(config.session.idle_timeout_minutes, 5);
        assert_eq!(config.session.sweep_interval_secs, 60);
        assert_eq!(config.dialogue.max_turns, 20);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = ColloquyConfig::load_or_default(Path::new("/nonexistent/config.toml"));
        assert_eq!(config.general.log_level, "info");
    }

    #[test]
    fn test_config_load_invalid_toml() {
        let file = create_temp_config("this is {{ not valid TOML");
        assert!(ColloquyConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_save_creates_parent_dirs_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("config.toml");

        let mut config = ColloquyConfig::default();
        config.dialogue.max_turns = 7;
        config
            .router
            .dimensions
            .insert("region".into(), vec!["EU".into(), "US".into()]);
        config.save(&path).unwrap();

        let reloaded = ColloquyConfig::load(&path).unwrap();
        assert_eq!(reloaded.dialogue.max_turns, 7);
        assert_eq!(reloaded.router.dimensions["region"], vec!["EU", "US"]);
        assert_eq!(reloaded.router.synonyms, config.router.synonyms);
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let file = create_temp_config("");
        let config = ColloquyConfig::load(file.path()).unwrap();
        assert_eq!(config.dialogue.analysis_window, 4);
        assert_eq!(config.collaborators.generation_timeout_secs, 15);
    }
}
