//! Dialogue controller: advances a session by one user message.
//!
//! The controller works on an owned copy of the session. Nothing it does is
//! visible until the caller commits the returned [`TurnOutcome`], so a turn
//! that is cancelled mid-flight leaves the stored session untouched.

use std::sync::Arc;

use tracing::{debug, warn};

use colloquy_core::collaborator::{with_timeout, Generator, Retriever, SearchFilters};
use colloquy_core::config::{CollaboratorConfig, DialogueConfig};
use colloquy_core::events::SessionEvent;
use colloquy_core::types::{
    ContextChunk, EndReason, ErrorKind, IntentAnalysis, IntentLabel, MemoryItem, MemoryTier,
    Phase, QueryScope, Role, Session, Timestamp, Turn, PENDING_QUERY_KEY,
};
use colloquy_memory::MemoryManager;
use colloquy_router::decompose::expand_with_synonyms;
use colloquy_router::IntentRouter;
use colloquy_validator::{ContextValidator, ValidationReport};

use crate::error::DialogueError;
use crate::phase::{end_reason, transition, SearchOutcome};
use crate::response::ResponseComposer;
use crate::types::{Reply, SourceRef};

/// Number of keywords per turn remembered as discussed topics.
const TOPICS_PER_TURN: usize = 3;

// =============================================================================
// TurnOutcome
// =============================================================================

/// Result of one controller step, applied atomically by the lifecycle
/// manager.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// The session as it should be stored after the turn.
    pub session: Session,
    pub reply: Reply,
    /// Events to publish once the turn commits.
    pub events: Vec<SessionEvent>,
    /// Memory items to store once the turn commits.
    pub memory_ops: Vec<MemoryItem>,
    /// Set when the turn moved the session to `Ending`.
    pub end_reason: Option<EndReason>,
}

/// Mutable state of a turn in progress.
struct TurnContext {
    session: Session,
    events: Vec<SessionEvent>,
    memory_ops: Vec<MemoryItem>,
    errors: Vec<String>,
}

impl TurnContext {
    fn new(session: Session) -> Self {
        Self {
            session,
            events: Vec::new(),
            memory_ops: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn set_phase(&mut self, to: Phase) {
        let from = self.session.phase;
        if from == to {
            return;
        }
        self.session.phase = to;
        debug!(session_id = %self.session.session_id, %from, %to, "Phase changed");
        self.events.push(SessionEvent::PhaseChanged {
            session_id: self.session.session_id.clone(),
            from,
            to,
            timestamp: Timestamp::now(),
        });
    }

    fn append(&mut self, turn: Turn, window: usize) {
        self.session.last_activity = turn.timestamp;
        self.events.push(SessionEvent::TurnAppended {
            session_id: self.session.session_id.clone(),
            turn_id: turn.id,
            role: turn.role,
            text: turn.text.clone(),
            timestamp: turn.timestamp,
        });
        self.session.append_turn(turn, window);
    }

    fn record_error(&mut self, err: &DialogueError, capacity: usize) {
        let kind = err.kind().unwrap_or(ErrorKind::Collaborator);
        let message = err.to_string();
        warn!(
            session_id = %self.session.session_id,
            %kind,
            error = %message,
            "Recovered from turn error"
        );
        self.session.record_error(kind, message.clone(), capacity);
        self.events.push(SessionEvent::ErrorRecorded {
            session_id: self.session.session_id.clone(),
            kind,
            message: message.clone(),
            timestamp: Timestamp::now(),
        });
        self.errors.push(message);
    }

    fn finish(self, mut reply: Reply, end_reason: Option<EndReason>) -> TurnOutcome {
        reply.phase = self.session.phase;
        reply.errors = self.errors;
        TurnOutcome {
            session: self.session,
            reply,
            events: self.events,
            memory_ops: self.memory_ops,
            end_reason,
        }
    }
}

/// Context that survived validation for this turn.
struct Searched {
    chunks: Vec<ContextChunk>,
    report: ValidationReport,
    from_cache: bool,
}

// =============================================================================
// DialogueController
// =============================================================================

/// Drives the phase machine. Shared by all sessions; holds no session state.
pub struct DialogueController {
    config: DialogueConfig,
    collaborators: CollaboratorConfig,
    router: Arc<IntentRouter>,
    validator: Arc<ContextValidator>,
    memory: Arc<MemoryManager>,
    retriever: Arc<dyn Retriever>,
    generator: Option<Arc<dyn Generator>>,
    composer: ResponseComposer,
}

impl DialogueController {
    pub fn new(
        config: DialogueConfig,
        collaborators: CollaboratorConfig,
        router: Arc<IntentRouter>,
        validator: Arc<ContextValidator>,
        memory: Arc<MemoryManager>,
        retriever: Arc<dyn Retriever>,
    ) -> Self {
        Self {
            config,
            collaborators,
            router,
            validator,
            memory,
            retriever,
            generator: None,
            composer: ResponseComposer::new(),
        }
    }

    /// Attach a generation collaborator. Without one, answers are extractive.
    pub fn with_generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn config(&self) -> &DialogueConfig {
        &self.config
    }

    pub fn composer(&self) -> &ResponseComposer {
        &self.composer
    }

    /// Greet a fresh session. Counts as its first turn and moves it to
    /// `Understanding`.
    pub fn greet(&self, session: Session) -> TurnOutcome {
        let mut cx = TurnContext::new(session);
        let text = self.greet_into(&mut cx);
        let mut reply = Reply::text(text, cx.session.phase);
        reply.suggested_questions = self.composer.starter_suggestions();
        cx.finish(reply, None)
    }

    /// Process one user message.
    ///
    /// Collaborator and input failures are recovered inside the turn and
    /// reported in [`Reply::errors`]. Capacity errors are returned to the
    /// caller.
    pub async fn advance(&self, session: Session, text: &str) -> Result<TurnOutcome, DialogueError> {
        if session.phase == Phase::Ending {
            return Err(DialogueError::SessionEnded(session.session_id));
        }

        let mut cx = TurnContext::new(session);

        if let Err(violation) = cx.session.check_invariants() {
            self.reset_corrupted(&mut cx, violation);
        }
        if cx.session.phase == Phase::Greeting {
            self.greet_into(&mut cx);
        }

        let pending = cx.session.pending_query().map(str::to_string);
        let chars = text.chars().count();
        if chars > self.config.max_message_chars {
            return Ok(self.reject_input(cx, chars, pending));
        }

        // Accepted
        cx.session.turn_count += 1;
        cx.append(Turn::user(text), self.config.history_window);

        match cx.session.phase {
            Phase::Clarifying | Phase::Responding => {
                let next = transition(cx.session.phase, None, SearchOutcome::NotRun, None);
                cx.set_phase(next);
            }
            Phase::Searching => {
                self.reset_corrupted(&mut cx, "session was left in the searching phase".into());
            }
            _ => {}
        }

        let recent = cx.session.recent_turns(self.config.analysis_window).to_vec();
        let analysis = self.router.analyze(text, &recent).await;
        self.note_analysis(&mut cx, text, &analysis);

        let next = transition(cx.session.phase, Some(analysis.label), SearchOutcome::NotRun, None);
        cx.set_phase(next);

        match next {
            Phase::Ending => Ok(self.force_end(cx, EndReason::Goodbye, None)),
            Phase::Responding => {
                let text = if analysis.label == IntentLabel::Help {
                    self.composer.help()
                } else {
                    self.composer.greeting_again()
                };
                cx.append(Turn::assistant(&text), self.config.history_window);
                let mut reply = Reply::text(text, Phase::Responding);
                reply.suggested_questions = self.composer.starter_suggestions();
                Ok(self.leave_responding(cx, reply, analysis.label))
            }
            _ => self.run_search(cx, &analysis, text, pending).await,
        }
    }

    // -- Phase handlers --

    fn greet_into(&self, cx: &mut TurnContext) -> String {
        cx.events.push(SessionEvent::Started {
            session_id: cx.session.session_id.clone(),
            conversation_id: cx.session.conversation_id,
            timestamp: Timestamp::now(),
        });
        cx.session.turn_count += 1;
        let text = self.composer.greeting();
        cx.append(Turn::assistant(&text), self.config.history_window);
        let next = transition(Phase::Greeting, None, SearchOutcome::NotRun, None);
        cx.set_phase(next);
        text
    }

    async fn run_search(
        &self,
        mut cx: TurnContext,
        analysis: &IntentAnalysis,
        text: &str,
        pending: Option<String>,
    ) -> Result<TurnOutcome, DialogueError> {
        let seeking = analysis.label.is_information_seeking() || analysis.label == IntentLabel::General;
        let (query, carried) = match pending {
            Some(pending) if seeking => (format!("{} {}", pending, text.trim()), true),
            _ => (text.trim().to_string(), false),
        };

        match self.search(&mut cx, analysis, &query, carried).await {
            Ok(searched) => {
                cx.events.push(SessionEvent::ContextValidated {
                    session_id: cx.session.session_id.clone(),
                    retrieved: searched.report.retrieved,
                    accepted: searched.report.accepted,
                    conflicts: searched.report.conflicts.len(),
                    timestamp: Timestamp::now(),
                });
                let outcome = if searched.chunks.is_empty() {
                    SearchOutcome::Empty
                } else {
                    SearchOutcome::Found(searched.chunks.len())
                };
                let next = transition(Phase::Searching, Some(analysis.label), outcome, None);
                cx.set_phase(next);

                if next == Phase::Clarifying {
                    return Ok(self.clarify(cx, analysis, &query));
                }
                let reply = self.answer(&mut cx, analysis, &query, searched).await;
                Ok(self.leave_responding(cx, reply, analysis.label))
            }
            Err(err) if err.is_recoverable() => {
                cx.record_error(&err, self.config.error_log_capacity);
                cx.set_phase(Phase::Responding);
                let text = self.composer.apology();
                cx.append(Turn::assistant(&text), self.config.history_window);
                let mut reply = Reply::text(text, Phase::Responding);
                reply.suggested_questions = self.composer.clarification_suggestions(analysis);
                Ok(self.leave_responding(cx, reply, analysis.label))
            }
            Err(err) => Err(err),
        }
    }

    async fn search(
        &self,
        cx: &mut TurnContext,
        analysis: &IntentAnalysis,
        query: &str,
        carried: bool,
    ) -> Result<Searched, DialogueError> {
        let session_id = cx.session.session_id.clone();

        let cached = self.memory.cached_chunks(&session_id, query)?;
        if !cached.is_empty() {
            debug!(session_id = %session_id, hits = cached.len(), "ToolCache hit");
            let (chunks, report) = self.validator.validate(cached, query).await;
            if !chunks.is_empty() {
                return Ok(Searched {
                    chunks,
                    report,
                    from_cache: true,
                });
            }
        }

        let queries: Vec<(String, SearchFilters)> = if carried || analysis.decomposition.is_empty() {
            vec![(query.to_string(), SearchFilters::default())]
        } else {
            analysis
                .decomposition
                .iter()
                .map(|sub| {
                    let mut filters = SearchFilters::default();
                    if analysis.scope == QueryScope::EntityLookup {
                        filters.entity = sub.target.clone();
                    }
                    (sub.text.clone(), filters)
                })
                .collect()
        };

        let mut retrieved: Vec<ContextChunk> = Vec::new();
        let mut failures: Vec<DialogueError> = Vec::new();
        for (sub_query, filters) in &queries {
            match self.retrieve(sub_query, filters).await {
                Ok(chunks) => retrieved.extend(chunks),
                Err(e) => failures.push(e),
            }
        }

        if failures.len() == queries.len() {
            let mut failures = failures.into_iter();
            let first = failures
                .next()
                .unwrap_or_else(|| DialogueError::Collaborator("no search queries".into()));
            for e in failures {
                cx.record_error(&e, self.config.error_log_capacity);
            }
            return Err(first);
        }
        for e in &failures {
            cx.record_error(e, self.config.error_log_capacity);
        }

        if retrieved.is_empty() {
            if let Some(expanded) = expand_with_synonyms(query, &analysis.synonyms) {
                debug!(session_id = %session_id, query = %expanded, "Retrying with synonyms");
                match self.retrieve(&expanded, &SearchFilters::default()).await {
                    Ok(chunks) => retrieved.extend(chunks),
                    Err(e) => cx.record_error(&e, self.config.error_log_capacity),
                }
            }
        }

        debug!(
            session_id = %session_id,
            queries = queries.len(),
            retrieved = retrieved.len(),
            "Retrieval complete"
        );
        let (chunks, report) = self.validator.validate(retrieved, query).await;
        Ok(Searched {
            chunks,
            report,
            from_cache: false,
        })
    }

    async fn retrieve(
        &self,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<ContextChunk>, DialogueError> {
        let docs = with_timeout(
            "retrieval",
            self.collaborators.retrieval_timeout_secs,
            self.retriever.search(query, self.config.search_top_k, filters),
        )
        .await?;
        Ok(docs.into_iter().map(ContextChunk::from).collect())
    }

    fn clarify(&self, mut cx: TurnContext, analysis: &IntentAnalysis, query: &str) -> TurnOutcome {
        cx.session.retry_count += 1;
        if let Some(reason) = self.limit_reached(&cx.session) {
            return self.force_end(cx, reason, None);
        }

        let text = self.composer.clarification(query);
        cx.append(
            Turn::assistant(&text).with_metadata(PENDING_QUERY_KEY, query),
            self.config.history_window,
        );

        let mut reply = Reply::text(text, Phase::Clarifying);
        reply.suggested_questions = self.composer.clarification_suggestions(analysis);
        reply.related_topics = self
            .composer
            .related_topics(analysis, &cx.session.topics_discussed);
        cx.finish(reply, None)
    }

    async fn answer(
        &self,
        cx: &mut TurnContext,
        analysis: &IntentAnalysis,
        query: &str,
        searched: Searched,
    ) -> Reply {
        let Searched {
            chunks,
            report,
            from_cache,
        } = searched;

        let extractive = self.composer.extractive_answer(&chunks, report.average_quality);
        let mut text = match &self.generator {
            Some(generator) => {
                let remembered = self.recall(&cx.session.session_id, query, &chunks);
                let recent = cx.session.recent_turns(self.config.analysis_window);
                let prompt = self.composer.build_prompt(
                    query,
                    &chunks,
                    &report.conflicts,
                    recent,
                    &remembered,
                );
                let generated = with_timeout(
                    "generation",
                    self.collaborators.generation_timeout_secs,
                    generator.generate(
                        &prompt,
                        self.collaborators.max_tokens,
                        self.collaborators.temperature,
                    ),
                )
                .await;
                match generated {
                    Ok(answer) if !answer.trim().is_empty() => answer.trim().to_string(),
                    Ok(_) => {
                        let err = DialogueError::Collaborator("generation returned no text".into());
                        cx.record_error(&err, self.config.error_log_capacity);
                        extractive
                    }
                    Err(e) => {
                        cx.record_error(&e.into(), self.config.error_log_capacity);
                        extractive
                    }
                }
            }
            None => extractive,
        };
        if let Some(hint) = self.composer.conflict_hint(&report.conflicts) {
            text = format!("{}\n\n{}", hint, text);
        }

        for chunk in &chunks {
            if !from_cache {
                cx.memory_ops.push(MemoryManager::tool_cache_item(query, chunk));
            }
            cx.memory_ops.push(
                MemoryItem::new(MemoryTier::Working, chunk.content.clone(), chunk.quality_score)
                    .with_metadata("source_id", chunk.source_id.clone()),
            );
        }
        cx.session.quality.record(report.average_quality);
        cx.session.retry_count = 0;

        let sources: Vec<SourceRef> = chunks.iter().map(SourceRef::from).collect();
        let source_ids: Vec<String> = sources.iter().map(|s| s.source_id.clone()).collect();
        cx.append(
            Turn::assistant(&text).with_metadata("sources", source_ids),
            self.config.history_window,
        );

        Reply {
            text,
            suggested_questions: self.composer.suggestions(analysis, &chunks),
            related_topics: self
                .composer
                .related_topics(analysis, &cx.session.topics_discussed),
            sources,
            errors: Vec::new(),
            phase: Phase::Responding,
        }
    }

    /// Working items from earlier turns relevant to `query`, excluding
    /// content already in this turn's context.
    fn recall(&self, session_id: &str, query: &str, chunks: &[ContextChunk]) -> Vec<MemoryItem> {
        let limit = self.memory.recall_limit();
        match self
            .memory
            .retrieve(session_id, MemoryTier::Working, query, limit + chunks.len())
        {
            Ok(items) => items
                .into_iter()
                .filter(|item| !chunks.iter().any(|c| c.content == item.content))
                .take(limit)
                .collect(),
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Memory recall failed");
                Vec::new()
            }
        }
    }

    /// Leave `Responding`: end the session if an end condition holds,
    /// otherwise return to `Understanding`.
    fn leave_responding(&self, cx: TurnContext, reply: Reply, label: IntentLabel) -> TurnOutcome {
        let end = end_reason(
            Some(label),
            cx.session.turn_count,
            cx.session.retry_count,
            cx.session.error_log.len(),
            &self.config,
        );
        match end {
            Some(reason) => self.force_end(cx, reason, Some(reply.text)),
            None => {
                let mut cx = cx;
                let next = transition(Phase::Responding, Some(label), SearchOutcome::NotRun, None);
                cx.set_phase(next);
                cx.finish(reply, None)
            }
        }
    }

    /// Move to `Ending` with a farewell, optionally preceded by `preface`.
    fn force_end(&self, mut cx: TurnContext, reason: EndReason, preface: Option<String>) -> TurnOutcome {
        let farewell = self.composer.farewell(reason);
        cx.append(Turn::assistant(&farewell), self.config.history_window);
        cx.set_phase(Phase::Ending);
        debug!(session_id = %cx.session.session_id, %reason, "Session reached an end condition");

        let text = match preface {
            Some(preface) => format!("{}\n\n{}", preface, farewell),
            None => farewell,
        };
        cx.finish(Reply::text(text, Phase::Ending), Some(reason))
    }

    fn reject_input(&self, mut cx: TurnContext, chars: usize, pending: Option<String>) -> TurnOutcome {
        let err = DialogueError::Input(format!(
            "message has {} characters, the limit is {}",
            chars, self.config.max_message_chars
        ));
        cx.record_error(&err, self.config.error_log_capacity);

        if let Some(reason) = self.limit_reached(&cx.session) {
            return self.force_end(cx, reason, None);
        }

        let text = format!(
            "Your message is too long ({} characters). Please keep it under {} characters.",
            chars, self.config.max_message_chars
        );
        let mut turn = Turn::assistant(&text);
        if let Some(pending) = pending {
            turn = turn.with_metadata(PENDING_QUERY_KEY, pending);
        }
        cx.append(turn, self.config.history_window);
        let phase = cx.session.phase;
        cx.finish(Reply::text(text, phase), None)
    }

    fn reset_corrupted(&self, cx: &mut TurnContext, violation: String) {
        let err = DialogueError::StateCorruption(violation);
        cx.record_error(&err, self.config.error_log_capacity);
        let user_turns = cx
            .session
            .turns
            .iter()
            .filter(|t| t.role == Role::User)
            .count() as u32;
        cx.session.turn_count = cx.session.turn_count.max(user_turns).max(1);
        cx.session.turns.sort_by_key(|t| t.timestamp);
        cx.set_phase(Phase::Understanding);
    }

    fn note_analysis(&self, cx: &mut TurnContext, text: &str, analysis: &IntentAnalysis) {
        debug!(
            session_id = %cx.session.session_id,
            label = %analysis.label,
            confidence = analysis.confidence,
            keywords = ?analysis.keywords,
            scope = ?analysis.scope,
            "Intent classified"
        );
        cx.events.push(SessionEvent::IntentClassified {
            session_id: cx.session.session_id.clone(),
            label: analysis.label,
            confidence: analysis.confidence,
            timestamp: Timestamp::now(),
        });

        let capacity = self.config.topics_capacity;
        for keyword in analysis.keywords.iter().take(TOPICS_PER_TURN) {
            cx.session.note_topic(keyword, capacity);
        }
        for entity in &analysis.entities {
            cx.session.note_topic(entity, capacity);
        }

        if !text.trim().is_empty() {
            cx.memory_ops.push(
                MemoryItem::new(MemoryTier::ShortTerm, text.trim(), analysis.confidence)
                    .with_metadata("intent", analysis.label.to_string()),
            );
        }
    }

    /// Limit-based end condition (everything except goodbye).
    fn limit_reached(&self, session: &Session) -> Option<EndReason> {
        end_reason(
            None,
            session.turn_count,
            session.retry_count,
            session.error_log.len(),
            &self.config,
        )
    }
}
