//! Session registry and lifecycle.
//!
//! The registry maps session ids to slots. Each slot owns the session behind
//! an async mutex, which is the per-session execution slot: a turn holds it
//! from the moment the session is resolved until the outcome is committed.
//! The registry lock itself is only held for lookups, inserts and removals.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use colloquy_core::collaborator::{with_timeout, LongTermStore, SummarySink};
use colloquy_core::config::{DialogueConfig, SessionConfig};
use colloquy_core::events::SessionEvent;
use colloquy_core::types::{
    EndReason, Phase, Session, SessionInfo, SessionSummary, Timestamp, Turn,
};
use colloquy_memory::MemoryManager;

use crate::controller::TurnOutcome;
use crate::error::DialogueError;
use crate::response::ResponseComposer;
use crate::types::Reply;

/// Deadline for the summary sink and long-term store when none is set.
const DEFAULT_PERSIST_TIMEOUT_SECS: u64 = 10;

struct SlotState {
    session: Session,
    /// Set once the session has been finalized and removed.
    closed: bool,
}

struct SessionSlot {
    state: Arc<AsyncMutex<SlotState>>,
    events: broadcast::Sender<SessionEvent>,
}

/// Exclusive access to one live session.
///
/// Dropping the guard without committing leaves the stored session as it
/// was.
pub struct SessionGuard {
    state: OwnedMutexGuard<SlotState>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionGuard {
    pub fn session(&self) -> &Session {
        &self.state.session
    }

    pub fn session_id(&self) -> &str {
        &self.state.session.session_id
    }

    fn publish(&self, events: Vec<SessionEvent>) {
        for event in events {
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
    }
}

// =============================================================================
// SessionLifecycle
// =============================================================================

/// Owns every live session.
pub struct SessionLifecycle {
    session_config: SessionConfig,
    dialogue_config: DialogueConfig,
    persist_timeout_secs: u64,
    memory: Arc<MemoryManager>,
    composer: ResponseComposer,
    summary_sink: Option<Arc<dyn SummarySink>>,
    long_term: Option<Arc<dyn LongTermStore>>,
    registry: Mutex<HashMap<String, Arc<SessionSlot>>>,
}

impl SessionLifecycle {
    pub fn new(
        session_config: SessionConfig,
        dialogue_config: DialogueConfig,
        memory: Arc<MemoryManager>,
    ) -> Self {
        Self {
            session_config,
            dialogue_config,
            persist_timeout_secs: DEFAULT_PERSIST_TIMEOUT_SECS,
            memory,
            composer: ResponseComposer::new(),
            summary_sink: None,
            long_term: None,
            registry: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_summary_sink(mut self, sink: Arc<dyn SummarySink>) -> Self {
        self.summary_sink = Some(sink);
        self
    }

    pub fn with_long_term_store(mut self, store: Arc<dyn LongTermStore>) -> Self {
        self.long_term = Some(store);
        self
    }

    /// Deadline applied to the summary sink and long-term store.
    pub fn with_persist_timeout(mut self, secs: u64) -> Self {
        self.persist_timeout_secs = secs;
        self
    }

    // -- Resolution --

    /// Register a fresh session, generating an id when none is given.
    pub async fn create(&self, session_id: Option<String>) -> Result<SessionGuard, DialogueError> {
        let id = match session_id {
            Some(id) if id.trim().is_empty() => {
                return Err(DialogueError::Input("session id must not be empty".into()))
            }
            Some(id) => id,
            None => Uuid::new_v4().to_string(),
        };
        let guard = self.insert(Session::new(id)).await?;
        info!(session_id = %guard.session_id(), "Session created");
        Ok(guard)
    }

    /// Register an existing session, e.g. one restored from a checkpoint.
    pub async fn insert(&self, session: Session) -> Result<SessionGuard, DialogueError> {
        let id = session.session_id.clone();
        match self.acquire(&id).await {
            Ok(_) => return Err(DialogueError::SessionExists(id)),
            Err(DialogueError::SessionNotFound(_)) => {}
            Err(e) => return Err(e),
        }
        self.try_insert(session)?
            .ok_or(DialogueError::SessionExists(id))
    }

    /// Lock a live session for a turn.
    ///
    /// A session found idle beyond the timeout is finalized on the spot and
    /// reported as not found.
    pub async fn acquire(&self, session_id: &str) -> Result<SessionGuard, DialogueError> {
        let slot = self.slot(session_id)?;
        let guard = SessionGuard {
            state: slot.state.clone().lock_owned().await,
            events: slot.events.clone(),
        };
        if guard.state.closed {
            return Err(DialogueError::SessionNotFound(session_id.to_string()));
        }
        if guard.state.session.is_idle(Timestamp::now(), self.idle_timeout_secs()) {
            debug!(session_id, "Session expired on access");
            self.finalize(guard, EndReason::IdleTimeout).await;
            return Err(DialogueError::SessionNotFound(session_id.to_string()));
        }
        Ok(guard)
    }

    /// Lock a live session, creating it when absent. The flag is true when
    /// the session was created by this call.
    pub async fn get_or_create(&self, session_id: &str) -> Result<(SessionGuard, bool), DialogueError> {
        if session_id.trim().is_empty() {
            return Err(DialogueError::Input("session id must not be empty".into()));
        }
        // Another caller may register the id between lookup and insert.
        for _ in 0..3 {
            match self.acquire(session_id).await {
                Ok(guard) => return Ok((guard, false)),
                Err(DialogueError::SessionNotFound(_)) => {}
                Err(e) => return Err(e),
            }
            if let Some(guard) = self.try_insert(Session::new(session_id))? {
                info!(session_id, "Session created");
                return Ok((guard, true));
            }
        }
        Err(DialogueError::Storage(format!(
            "could not register session {}",
            session_id
        )))
    }

    // -- Turn commit --

    /// Apply a controller outcome: store memory items, write the session
    /// back, then publish the turn's events. A rejected memory batch leaves
    /// the stored session, memory and subscribers as they were.
    pub fn commit(
        &self,
        guard: &mut SessionGuard,
        outcome: TurnOutcome,
    ) -> Result<(Reply, Option<EndReason>), DialogueError> {
        let TurnOutcome {
            session,
            reply,
            events,
            memory_ops,
            end_reason,
        } = outcome;

        self.memory.store_all(&session.session_id, memory_ops)?;
        guard.state.session = session;
        guard.publish(events);
        Ok((reply, end_reason))
    }

    // -- Ending --

    /// End a session explicitly.
    pub async fn end(&self, session_id: &str) -> Result<SessionSummary, DialogueError> {
        let guard = self.acquire(session_id).await?;
        Ok(self.finalize(guard, EndReason::Explicit).await)
    }

    /// Produce the farewell and summary, hand promoted memory and the
    /// summary to the persistence collaborators, purge memory and remove the
    /// session.
    pub async fn finalize(&self, mut guard: SessionGuard, reason: EndReason) -> SessionSummary {
        let now = Timestamp::now();
        let mut events = Vec::new();

        let session = &mut guard.state.session;
        if session.phase != Phase::Ending {
            let farewell = Turn::assistant(self.composer.farewell(reason));
            events.push(SessionEvent::TurnAppended {
                session_id: session.session_id.clone(),
                turn_id: farewell.id,
                role: farewell.role,
                text: farewell.text.clone(),
                timestamp: farewell.timestamp,
            });
            events.push(SessionEvent::PhaseChanged {
                session_id: session.session_id.clone(),
                from: session.phase,
                to: Phase::Ending,
                timestamp: now,
            });
            session.last_activity = farewell.timestamp;
            session.append_turn(farewell, self.dialogue_config.history_window);
            session.phase = Phase::Ending;
        }

        let summary = SessionSummary {
            session_id: session.session_id.clone(),
            conversation_id: session.conversation_id,
            turn_count: session.turn_count,
            topics_discussed: session.topics_discussed.clone(),
            quality_score: session.quality.mean(),
            duration_secs: now.secs_since(session.started_at),
            ended_at: now,
            reason,
        };
        let session_id = summary.session_id.clone();

        match self.memory.promote(&session_id) {
            Ok(promoted) if !promoted.is_empty() => {
                if let Some(store) = &self.long_term {
                    let persisted = with_timeout(
                        "long-term store",
                        self.persist_timeout_secs,
                        store.persist(&session_id, &promoted),
                    )
                    .await;
                    if let Err(e) = persisted {
                        warn!(session_id = %session_id, error = %e, "Failed to persist promoted memory");
                    }
                }
            }
            Ok(_) => {}
            Err(e) => warn!(session_id = %session_id, error = %e, "Memory promotion failed"),
        }

        if let Some(sink) = &self.summary_sink {
            let recorded = with_timeout(
                "summary sink",
                self.persist_timeout_secs,
                sink.record(&summary),
            )
            .await;
            if let Err(e) = recorded {
                warn!(session_id = %session_id, error = %e, "Failed to record session summary");
            }
        }

        match self.memory.purge(&session_id) {
            Ok(purged) => debug!(session_id = %session_id, purged, "Session memory purged"),
            Err(e) => warn!(session_id = %session_id, error = %e, "Memory purge failed"),
        }

        match self.registry.lock() {
            Ok(mut registry) => {
                registry.remove(&session_id);
            }
            Err(e) => warn!(session_id = %session_id, error = %e, "Session registry lock poisoned"),
        }

        events.push(SessionEvent::Ended {
            session_id: session_id.clone(),
            reason,
            summary: summary.clone(),
            timestamp: now,
        });
        guard.state.closed = true;
        guard.publish(events);

        info!(
            session_id = %session_id,
            %reason,
            turns = summary.turn_count,
            quality = summary.quality_score,
            duration_secs = summary.duration_secs,
            "Session ended"
        );
        summary
    }

    /// Finalize every session idle beyond the timeout. Sessions with a turn
    /// in flight are skipped. Returns the ids removed.
    pub async fn sweep_expired(&self) -> Vec<String> {
        let now = Timestamp::now();
        let idle = self.idle_timeout_secs();
        let mut expired = Vec::new();

        for slot in self.snapshot() {
            let Ok(state) = slot.state.clone().try_lock_owned() else {
                continue;
            };
            if state.closed || !state.session.is_idle(now, idle) {
                continue;
            }
            let guard = SessionGuard {
                state,
                events: slot.events.clone(),
            };
            let summary = self.finalize(guard, EndReason::IdleTimeout).await;
            expired.push(summary.session_id);
        }

        if !expired.is_empty() {
            info!(count = expired.len(), "Swept idle sessions");
        }
        expired
    }

    // -- Introspection --

    /// Lightweight info for every live session, ordered by id.
    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        let mut infos = Vec::new();
        for slot in self.snapshot() {
            let state = slot.state.lock().await;
            if state.closed {
                continue;
            }
            infos.push(SessionInfo {
                session_id: state.session.session_id.clone(),
                phase: state.session.phase,
                turn_count: state.session.turn_count,
                last_activity: state.session.last_activity,
            });
        }
        infos.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        infos
    }

    /// Receive the events of a live session from now on.
    pub fn subscribe(&self, session_id: &str) -> Result<broadcast::Receiver<SessionEvent>, DialogueError> {
        Ok(self.slot(session_id)?.events.subscribe())
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.registry
            .lock()
            .map(|r| r.contains_key(session_id))
            .unwrap_or(false)
    }

    pub fn active_count(&self) -> usize {
        self.registry.lock().map(|r| r.len()).unwrap_or(0)
    }

    // -- Private helpers --

    fn idle_timeout_secs(&self) -> i64 {
        i64::from(self.session_config.idle_timeout_minutes) * 60
    }

    fn registry(&self) -> Result<MutexGuard<'_, HashMap<String, Arc<SessionSlot>>>, DialogueError> {
        self.registry
            .lock()
            .map_err(|e| DialogueError::Storage(format!("session registry lock poisoned: {}", e)))
    }

    fn slot(&self, session_id: &str) -> Result<Arc<SessionSlot>, DialogueError> {
        self.registry()?
            .get(session_id)
            .cloned()
            .ok_or_else(|| DialogueError::SessionNotFound(session_id.to_string()))
    }

    fn snapshot(&self) -> Vec<Arc<SessionSlot>> {
        match self.registry.lock() {
            Ok(registry) => registry.values().cloned().collect(),
            Err(e) => {
                warn!(error = %e, "Session registry lock poisoned");
                Vec::new()
            }
        }
    }

    fn try_insert(&self, session: Session) -> Result<Option<SessionGuard>, DialogueError> {
        let mut registry = self.registry()?;
        if registry.contains_key(&session.session_id) {
            return Ok(None);
        }
        let id = session.session_id.clone();
        let (events, _) = broadcast::channel(self.session_config.event_buffer.max(1));
        let state = Arc::new(AsyncMutex::new(SlotState {
            session,
            closed: false,
        }));
        let locked = state
            .clone()
            .try_lock_owned()
            .map_err(|e| DialogueError::Storage(e.to_string()))?;
        registry.insert(
            id,
            Arc::new(SessionSlot {
                state,
                events: events.clone(),
            }),
        );
        Ok(Some(SessionGuard {
            state: locked,
            events,
        }))
    }
}
