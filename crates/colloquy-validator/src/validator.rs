//! Scoring, filtering, and capping of retrieved chunks.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use colloquy_core::collaborator::{with_timeout, ContextJudge};
use colloquy_core::config::ValidatorConfig;
use colloquy_core::types::{ContextChunk, ValidationFlag};

use crate::conflict::{detect_conflicts, Conflict};
use crate::scan::{pattern_component, scan_content};

/// Outcome of one validation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Chunks handed in, after merging duplicates.
    pub retrieved: usize,
    pub accepted: usize,
    pub below_threshold: usize,
    pub over_cap: usize,
    /// Chunks that raised at least one suspicious-content flag.
    pub flagged: usize,
    pub conflicts: Vec<Conflict>,
    /// Whether the external judge contributed to any score.
    pub external_used: bool,
    /// Mean quality of the accepted chunks (0 when none).
    pub average_quality: f32,
}

impl ValidationReport {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

/// Stateless context validator shared by all sessions.
pub struct ContextValidator {
    config: ValidatorConfig,
    judge: Option<Arc<dyn ContextJudge>>,
}

impl ContextValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self {
            config,
            judge: None,
        }
    }

    /// Attach an external judge whose score joins the weighted combination.
    pub fn with_judge(mut self, judge: Arc<dyn ContextJudge>) -> Self {
        self.judge = Some(judge);
        self
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Validate chunks against `query`, consulting the external judge when
    /// one is attached.
    ///
    /// After the first judge timeout or failure the remaining chunks are
    /// scored without it.
    pub async fn validate(
        &self,
        chunks: Vec<ContextChunk>,
        query: &str,
    ) -> (Vec<ContextChunk>, ValidationReport) {
        let merged = merge_duplicates(chunks);
        let mut judge_available = self.judge.is_some();
        let mut external_used = false;
        let mut scored = Vec::with_capacity(merged.len());

        for chunk in merged {
            let mut external = None;
            if let (true, Some(judge)) = (judge_available, &self.judge) {
                match with_timeout(
                    "context judge",
                    self.config.external_timeout_secs,
                    judge.judge(&chunk, query),
                )
                .await
                {
                    Ok(score) if score.is_finite() => {
                        external = Some(score.clamp(0.0, 1.0));
                        external_used = true;
                    }
                    Ok(_) => {
                        debug!("Context judge returned a non-finite score, ignoring");
                    }
                    Err(e) => {
                        warn!(error = %e, "Context judge unavailable, scoring locally");
                        judge_available = false;
                    }
                }
            }
            scored.push(self.score(chunk, external));
        }

        let (accepted, mut report) = self.select(scored);
        report.external_used = external_used;
        (accepted, report)
    }

    /// Validate without the external judge. Deterministic.
    pub fn validate_local(&self, chunks: Vec<ContextChunk>) -> (Vec<ContextChunk>, ValidationReport) {
        let scored = merge_duplicates(chunks)
            .into_iter()
            .map(|chunk| self.score(chunk, None))
            .collect();
        self.select(scored)
    }

    /// Scan a chunk and compute its quality score.
    pub fn score(&self, mut chunk: ContextChunk, external: Option<f32>) -> ContextChunk {
        let flags = scan_content(&chunk.content);
        let pattern = pattern_component(&flags);
        let raw = if chunk.raw_score.is_finite() {
            chunk.raw_score.clamp(0.0, 1.0)
        } else {
            0.0
        };

        let mut weighted = self.config.raw_weight * raw + self.config.pattern_weight * pattern;
        let mut total_weight = self.config.raw_weight + self.config.pattern_weight;
        if let Some(ext) = external {
            weighted += self.config.external_weight * ext;
            total_weight += self.config.external_weight;
        }

        chunk.quality_score = if total_weight > 0.0 {
            (weighted / total_weight).clamp(0.0, 1.0)
        } else {
            0.0
        };
        chunk.flags = flags;
        chunk
    }

    fn select(&self, mut scored: Vec<ContextChunk>) -> (Vec<ContextChunk>, ValidationReport) {
        let retrieved = scored.len();
        let flagged = scored.iter().filter(|c| !c.flags.is_empty()).count();

        scored.retain(|c| c.quality_score >= self.config.threshold);
        let below_threshold = retrieved - scored.len();

        scored.sort_by(|a, b| b.quality_score.total_cmp(&a.quality_score));
        let over_cap = scored.len().saturating_sub(self.config.max_accepted);
        scored.truncate(self.config.max_accepted);

        let conflicts = detect_conflicts(&scored);
        for conflict in &conflicts {
            for chunk in scored
                .iter_mut()
                .filter(|c| c.source_id == conflict.first || c.source_id == conflict.second)
            {
                if !chunk.flags.contains(&ValidationFlag::Conflicting) {
                    chunk.flags.push(ValidationFlag::Conflicting);
                }
            }
        }

        let average_quality = if scored.is_empty() {
            0.0
        } else {
            scored.iter().map(|c| c.quality_score).sum::<f32>() / scored.len() as f32
        };

        debug!(
            retrieved,
            accepted = scored.len(),
            below_threshold,
            over_cap,
            conflicts = conflicts.len(),
            "Context validated"
        );

        let report = ValidationReport {
            retrieved,
            accepted: scored.len(),
            below_threshold,
            over_cap,
            flagged,
            conflicts,
            external_used: false,
            average_quality,
        };
        (scored, report)
    }
}

/// Collapse chunks with the same source and content (sub-queries often
/// retrieve the same passage), keeping the highest retrieval score.
fn merge_duplicates(chunks: Vec<ContextChunk>) -> Vec<ContextChunk> {
    let mut merged: Vec<ContextChunk> = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        match merged
            .iter_mut()
            .find(|c| c.source_id == chunk.source_id && c.content == chunk.content)
        {
            Some(existing) => {
                if chunk.raw_score > existing.raw_score {
                    existing.raw_score = chunk.raw_score;
                }
            }
            None => merged.push(chunk),
        }
    }
    merged
}
