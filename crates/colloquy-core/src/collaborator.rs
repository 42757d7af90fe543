//! Contracts of the external collaborators the orchestrator calls into.
//!
//! Every call made through these traits is a suspension point and is wrapped
//! in [`with_timeout`] by the caller.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ContextChunk, MemoryItem, Metadata, SessionSummary, Turn};

/// Failure of an external collaborator call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    #[error("{collaborator} timed out after {secs}s")]
    Timeout {
        collaborator: &'static str,
        secs: u64,
    },

    #[error("collaborator failed: {0}")]
    Failed(String),

    #[error("malformed collaborator output: {0}")]
    Malformed(String),
}

impl CollaboratorError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CollaboratorError::Timeout { .. })
    }
}

/// Run a collaborator future under a deadline.
pub async fn with_timeout<T, F>(
    collaborator: &'static str,
    secs: u64,
    fut: F,
) -> Result<T, CollaboratorError>
where
    F: Future<Output = Result<T, CollaboratorError>>,
{
    match tokio::time::timeout(Duration::from_secs(secs), fut).await {
        Ok(result) => result,
        Err(_) => Err(CollaboratorError::Timeout { collaborator, secs }),
    }
}

/// Optional constraints passed along with a retrieval query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Restrict results to documents mentioning this entity.
    pub entity: Option<String>,
    /// Exact-match metadata constraints.
    pub metadata: BTreeMap<String, String>,
}

/// One result returned by the retrieval collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub content: String,
    pub score: f32,
    pub source_id: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl From<RetrievedDocument> for ContextChunk {
    fn from(doc: RetrievedDocument) -> Self {
        let mut chunk = ContextChunk::new(doc.content, doc.source_id, doc.score);
        chunk.metadata = doc.metadata;
        chunk
    }
}

/// Document search. Stateless and safe to retry.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<RetrievedDocument>, CollaboratorError>;
}

/// Opaque text generation.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, CollaboratorError>;
}

/// External intent classifier.
///
/// Returns a JSON document such as
/// `{"intent": "question", "confidence": 0.92, "keywords": ["vacation"]}`.
/// Output that does not parse is ignored by the router.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, utterance: &str, recent: &[Turn])
        -> Result<String, CollaboratorError>;
}

/// External relevance judge used by the context validator.
#[async_trait]
pub trait ContextJudge: Send + Sync {
    /// Score in [0, 1] for how well `chunk` supports an answer to `query`.
    async fn judge(&self, chunk: &ContextChunk, query: &str) -> Result<f32, CollaboratorError>;
}

/// Receives end-of-session summaries.
#[async_trait]
pub trait SummarySink: Send + Sync {
    async fn record(&self, summary: &SessionSummary) -> Result<(), CollaboratorError>;
}

/// Persists memory items promoted to the LongTerm tier.
#[async_trait]
pub trait LongTermStore: Send + Sync {
    async fn persist(&self, session_id: &str, items: &[MemoryItem])
        -> Result<(), CollaboratorError>;
}
