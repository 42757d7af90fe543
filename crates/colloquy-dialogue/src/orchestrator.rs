//! Transport-facing orchestrator.
//!
//! Wires the router, validator, memory manager and collaborators into a
//! [`DialogueController`] and a [`SessionLifecycle`], and exposes the
//! session operations: start, send a message, read history, end, checkpoint
//! and restore.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, error, info};

use colloquy_core::collaborator::{
    ContextJudge, Generator, IntentClassifier, LongTermStore, Retriever, SummarySink,
};
use colloquy_core::config::ColloquyConfig;
use colloquy_core::events::SessionEvent;
use colloquy_core::types::{Phase, Session, SessionCheckpoint, SessionInfo, SessionSummary, Turn};
use colloquy_memory::MemoryManager;
use colloquy_router::IntentRouter;
use colloquy_validator::ContextValidator;

use crate::controller::DialogueController;
use crate::error::DialogueError;
use crate::lifecycle::SessionLifecycle;
use crate::sweeper::Sweeper;
use crate::types::{StartResponse, TurnResponse};

// =============================================================================
// OrchestratorBuilder
// =============================================================================

/// Builder for [`Orchestrator`]. Only the retriever is required.
pub struct OrchestratorBuilder {
    config: ColloquyConfig,
    retriever: Arc<dyn Retriever>,
    generator: Option<Arc<dyn Generator>>,
    classifier: Option<Arc<dyn IntentClassifier>>,
    judge: Option<Arc<dyn ContextJudge>>,
    summary_sink: Option<Arc<dyn SummarySink>>,
    long_term: Option<Arc<dyn LongTermStore>>,
}

impl OrchestratorBuilder {
    pub fn new(config: ColloquyConfig, retriever: Arc<dyn Retriever>) -> Self {
        Self {
            config,
            retriever,
            generator: None,
            classifier: None,
            judge: None,
            summary_sink: None,
            long_term: None,
        }
    }

    pub fn generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn IntentClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn judge(mut self, judge: Arc<dyn ContextJudge>) -> Self {
        self.judge = Some(judge);
        self
    }

    pub fn summary_sink(mut self, sink: Arc<dyn SummarySink>) -> Self {
        self.summary_sink = Some(sink);
        self
    }

    pub fn long_term_store(mut self, store: Arc<dyn LongTermStore>) -> Self {
        self.long_term = Some(store);
        self
    }

    pub fn build(self) -> Orchestrator {
        let config = self.config;
        if config.dialogue.max_errors > config.dialogue.error_log_capacity {
            error!(
                max_errors = config.dialogue.max_errors,
                error_log_capacity = config.dialogue.error_log_capacity,
                "dialogue.max_errors exceeds dialogue.error_log_capacity; the error limit can never trigger"
            );
        }

        let memory = Arc::new(MemoryManager::new(config.memory.clone()));

        let mut router = IntentRouter::new(config.router.clone());
        if let Some(classifier) = self.classifier {
            router = router.with_classifier(classifier);
        }
        let mut validator = ContextValidator::new(config.validator.clone());
        if let Some(judge) = self.judge {
            validator = validator.with_judge(judge);
        }

        let mut controller = DialogueController::new(
            config.dialogue.clone(),
            config.collaborators.clone(),
            Arc::new(router),
            Arc::new(validator),
            memory.clone(),
            self.retriever,
        );
        if let Some(generator) = self.generator {
            controller = controller.with_generator(generator);
        }

        let mut lifecycle = SessionLifecycle::new(
            config.session.clone(),
            config.dialogue.clone(),
            memory.clone(),
        )
        .with_persist_timeout(config.collaborators.retrieval_timeout_secs);
        if let Some(sink) = self.summary_sink {
            lifecycle = lifecycle.with_summary_sink(sink);
        }
        if let Some(store) = self.long_term {
            lifecycle = lifecycle.with_long_term_store(store);
        }

        Orchestrator {
            config,
            controller: Arc::new(controller),
            lifecycle: Arc::new(lifecycle),
            memory,
        }
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Entry point for transports. Cheap to share behind an `Arc`.
pub struct Orchestrator {
    config: ColloquyConfig,
    controller: Arc<DialogueController>,
    lifecycle: Arc<SessionLifecycle>,
    memory: Arc<MemoryManager>,
}

impl Orchestrator {
    pub fn builder(config: ColloquyConfig, retriever: Arc<dyn Retriever>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config, retriever)
    }

    /// Start a session and return its greeting. Fails with `SessionExists`
    /// when the id belongs to a live session.
    pub async fn start(&self, session_id: Option<String>) -> Result<StartResponse, DialogueError> {
        let mut guard = self.lifecycle.create(session_id).await?;
        let outcome = self.controller.greet(guard.session().clone());
        let (reply, _) = self.lifecycle.commit(&mut guard, outcome)?;
        Ok(StartResponse {
            session_id: guard.session_id().to_string(),
            greeting_text: reply.text,
        })
    }

    /// Process one user message. Unknown ids start a new session, which is
    /// greeted before the message is handled. The session is finalized when
    /// the turn ends it.
    pub async fn send_message(&self, session_id: &str, text: &str) -> Result<TurnResponse, DialogueError> {
        let (mut guard, created) = self.lifecycle.get_or_create(session_id).await?;
        if created {
            debug!(session_id, "Session created by first message");
        }

        let outcome = self.controller.advance(guard.session().clone(), text).await?;
        let (reply, end_reason) = self.lifecycle.commit(&mut guard, outcome)?;
        if let Some(reason) = end_reason {
            self.lifecycle.finalize(guard, reason).await;
        }
        Ok(reply.into())
    }

    /// The last `max_messages` turns, oldest first.
    pub async fn get_history(&self, session_id: &str, max_messages: usize) -> Result<Vec<Turn>, DialogueError> {
        let guard = self.lifecycle.acquire(session_id).await?;
        Ok(guard.session().recent_turns(max_messages).to_vec())
    }

    /// End a session and return its summary.
    pub async fn end(&self, session_id: &str) -> Result<SessionSummary, DialogueError> {
        self.lifecycle.end(session_id).await
    }

    /// Finalize idle sessions. Returns the ids removed.
    pub async fn sweep_expired(&self) -> Vec<String> {
        self.lifecycle.sweep_expired().await
    }

    pub async fn checkpoint(&self, session_id: &str) -> Result<SessionCheckpoint, DialogueError> {
        let guard = self.lifecycle.acquire(session_id).await?;
        Ok(guard.session().checkpoint())
    }

    /// Register a session from a checkpoint. The id must not be live.
    pub async fn restore(&self, checkpoint: SessionCheckpoint) -> Result<(), DialogueError> {
        if checkpoint.phase == Phase::Ending {
            return Err(DialogueError::SessionEnded(checkpoint.session_id));
        }
        let session = Session::from_checkpoint(checkpoint);
        let guard = self.lifecycle.insert(session).await?;
        info!(
            session_id = %guard.session_id(),
            phase = %guard.session().phase,
            turn_count = guard.session().turn_count,
            "Session restored"
        );
        Ok(())
    }

    pub fn subscribe(&self, session_id: &str) -> Result<broadcast::Receiver<SessionEvent>, DialogueError> {
        self.lifecycle.subscribe(session_id)
    }

    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        self.lifecycle.list_sessions().await
    }

    /// Background sweeper running at the configured interval.
    pub fn sweeper(&self) -> Sweeper {
        Sweeper::new(
            self.lifecycle.clone(),
            Duration::from_secs(self.config.session.sweep_interval_secs.max(1)),
        )
    }

    pub fn config(&self) -> &ColloquyConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> &Arc<SessionLifecycle> {
        &self.lifecycle
    }

    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use colloquy_core::collaborator::{CollaboratorError, RetrievedDocument, SearchFilters};
    use colloquy_core::types::Timestamp;

    struct EmptyRetriever;

    #[async_trait]
    impl Retriever for EmptyRetriever {
        async fn search(
            &self,
            _query: &str,
            _top_k: usize,
            _filters: &SearchFilters,
        ) -> Result<Vec<RetrievedDocument>, CollaboratorError> {
            Ok(vec![])
        }
    }

    fn orchestrator() -> Orchestrator {
        Orchestrator::builder(ColloquyConfig::default(), Arc::new(EmptyRetriever)).build()
    }

    #[tokio::test]
    async fn test_start_and_duplicate() {
        let orch = orchestrator();
        let started = orch.start(Some("abc".into())).await.unwrap();
        assert_eq!(started.session_id, "abc");
        assert!(started.greeting_text.starts_with("Hello"));
        let err = orch.start(Some("abc".into())).await.unwrap_err();
        assert!(matches!(err, DialogueError::SessionExists(_)));
    }

    #[tokio::test]
    async fn test_send_message_to_unknown_id_creates_session() {
        let orch = orchestrator();
        let response = orch.send_message("new", "help").await.unwrap();
        assert_eq!(response.phase, Phase::Understanding);
        let history = orch.get_history("new", 10).await.unwrap();
        // greeting, user message, help text
        assert_eq!(history.len(), 3);
    }

    #[tokio::test]
    async fn test_goodbye_removes_session() {
        let orch = orchestrator();
        orch.start(Some("abc".into())).await.unwrap();
        let response = orch.send_message("abc", "bye").await.unwrap();
        assert_eq!(response.phase, Phase::Ending);
        assert!(orch.list_sessions().await.is_empty());
        let err = orch.get_history("abc", 10).await.unwrap_err();
        assert!(matches!(err, DialogueError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let orch = orchestrator();
        orch.start(Some("abc".into())).await.unwrap();
        orch.send_message("abc", "help").await.unwrap();
        let history = orch.get_history("abc", 2).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].text, "help");
    }

    #[tokio::test]
    async fn test_restore_rejects_live_and_ended() {
        let orch = orchestrator();
        orch.start(Some("abc".into())).await.unwrap();
        let checkpoint = orch.checkpoint("abc").await.unwrap();
        let err = orch.restore(checkpoint.clone()).await.unwrap_err();
        assert!(matches!(err, DialogueError::SessionExists(_)));

        let mut ended = checkpoint;
        ended.session_id = "other".into();
        ended.phase = Phase::Ending;
        let err = orch.restore(ended).await.unwrap_err();
        assert!(matches!(err, DialogueError::SessionEnded(_)));
    }

    #[tokio::test]
    async fn test_sweep_removes_restored_idle_session() {
        let orch = orchestrator();
        orch.start(Some("abc".into())).await.unwrap();
        let mut checkpoint = orch.checkpoint("abc").await.unwrap();
        checkpoint.session_id = "idle".into();
        checkpoint.last_activity = Timestamp::now().minus_secs(31 * 60);
        orch.restore(checkpoint).await.unwrap();

        assert_eq!(orch.sweep_expired().await, vec!["idle".to_string()]);
        let ids: Vec<String> = orch
            .list_sessions()
            .await
            .into_iter()
            .map(|s| s.session_id)
            .collect();
        assert_eq!(ids, vec!["abc".to_string()]);
    }
}
