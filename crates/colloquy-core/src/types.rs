use std::collections::BTreeMap;
use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// Free-form metadata attached to turns, chunks, and memory items.
///
/// A `BTreeMap` keeps serialized checkpoints byte-stable.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Metadata key under which a clarification turn records the query it is
/// waiting on.
pub const PENDING_QUERY_KEY: &str = "pending_query";

// =============================================================================
// Timestamp
// =============================================================================

/// Seconds since the Unix epoch (UTC).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp())
    }

    /// Seconds elapsed between `earlier` and `self`, clamped at zero.
    pub fn secs_since(&self, earlier: Timestamp) -> i64 {
        (self.0 - earlier.0).max(0)
    }

    pub fn minus_secs(&self, secs: i64) -> Self {
        Self(self.0 - secs)
    }
}

// =============================================================================
// Phase
// =============================================================================

/// Dialogue phase. Exactly one is active per session at any time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Greeting,
    Understanding,
    Searching,
    Responding,
    Clarifying,
    FollowUp,
    Ending,
}

impl Phase {
    pub const ALL: [Phase; 7] = [
        Phase::Greeting,
        Phase::Understanding,
        Phase::Searching,
        Phase::Responding,
        Phase::Clarifying,
        Phase::FollowUp,
        Phase::Ending,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Ending)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Greeting => write!(f, "greeting"),
            Phase::Understanding => write!(f, "understanding"),
            Phase::Searching => write!(f, "searching"),
            Phase::Responding => write!(f, "responding"),
            Phase::Clarifying => write!(f, "clarifying"),
            Phase::FollowUp => write!(f, "follow_up"),
            Phase::Ending => write!(f, "ending"),
        }
    }
}

// =============================================================================
// Turns
// =============================================================================

/// Author of a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
        }
    }
}

/// One message in a conversation. Immutable once appended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: Uuid,
    pub role: Role,
    pub text: String,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Turn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            text: text.into(),
            timestamp: Timestamp::now(),
            metadata: Metadata::new(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

// =============================================================================
// Intent analysis
// =============================================================================

/// Closed set of intent labels produced by the router.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentLabel {
    Greeting,
    Question,
    Search,
    Comparison,
    Explanation,
    Help,
    Goodbye,
    General,
}

impl IntentLabel {
    pub const ALL: [IntentLabel; 8] = [
        IntentLabel::Greeting,
        IntentLabel::Question,
        IntentLabel::Search,
        IntentLabel::Comparison,
        IntentLabel::Explanation,
        IntentLabel::Help,
        IntentLabel::Goodbye,
        IntentLabel::General,
    ];

    /// Labels that require evidence from the retrieval collaborator.
    pub fn is_information_seeking(&self) -> bool {
        matches!(
            self,
            IntentLabel::Question
                | IntentLabel::Search
                | IntentLabel::Comparison
                | IntentLabel::Explanation
        )
    }

    /// Parse a label as emitted by an external classifier. Case-insensitive;
    /// `information_seeking` maps to `Question`.
    pub fn parse(label: &str) -> Option<Self> {
        let normalized = label.trim().to_lowercase().replace([' ', '-'], "_");
        let parsed = match normalized.as_str() {
            "greeting" => IntentLabel::Greeting,
            "question" | "information_seeking" => IntentLabel::Question,
            "search" => IntentLabel::Search,
            "comparison" => IntentLabel::Comparison,
            "explanation" => IntentLabel::Explanation,
            "help" => IntentLabel::Help,
            "goodbye" => IntentLabel::Goodbye,
            "general" => IntentLabel::General,
            _ => return None,
        };
        Some(parsed)
    }
}

impl fmt::Display for IntentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntentLabel::Greeting => write!(f, "greeting"),
            IntentLabel::Question => write!(f, "question"),
            IntentLabel::Search => write!(f, "search"),
            IntentLabel::Comparison => write!(f, "comparison"),
            IntentLabel::Explanation => write!(f, "explanation"),
            IntentLabel::Help => write!(f, "help"),
            IntentLabel::Goodbye => write!(f, "goodbye"),
            IntentLabel::General => write!(f, "general"),
        }
    }
}

/// Breadth of what the user asked for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryScope {
    /// A single target.
    #[default]
    Specific,
    /// Every member of some set ("all buildings").
    All,
    /// A bounded range ("between 2019 and 2021").
    Range,
    /// A person or named entity; searched with several query variants.
    EntityLookup,
}

/// One independently dispatched search query.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubQuery {
    pub text: String,
    /// The target this sub-query covers, when decomposed per target.
    pub target: Option<String>,
}

/// Which tier of the router produced an analysis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisSource {
    Patterns,
    Classifier,
}

/// Per-turn classification of a user utterance. Recomputed every turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntentAnalysis {
    pub label: IntentLabel,
    pub confidence: f32,
    pub keywords: Vec<String>,
    pub entities: Vec<String>,
    pub scope: QueryScope,
    pub decomposition: Vec<SubQuery>,
    pub synonyms: BTreeMap<String, Vec<String>>,
    pub source: AnalysisSource,
}

// =============================================================================
// Context chunks
// =============================================================================

/// Reason a chunk was flagged during validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationFlag {
    Placeholder,
    Boilerplate,
    ContradictoryMarker,
    TooShort,
    Conflicting,
}

impl fmt::Display for ValidationFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationFlag::Placeholder => write!(f, "placeholder"),
            ValidationFlag::Boilerplate => write!(f, "boilerplate"),
            ValidationFlag::ContradictoryMarker => write!(f, "contradictory_marker"),
            ValidationFlag::TooShort => write!(f, "too_short"),
            ValidationFlag::Conflicting => write!(f, "conflicting"),
        }
    }
}

/// Candidate evidence returned by retrieval.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContextChunk {
    pub content: String,
    pub source_id: String,
    /// Score assigned by the retrieval collaborator.
    pub raw_score: f32,
    /// Score assigned by the context validator (0 until validated).
    pub quality_score: f32,
    #[serde(default)]
    pub flags: Vec<ValidationFlag>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ContextChunk {
    pub fn new(content: impl Into<String>, source_id: impl Into<String>, raw_score: f32) -> Self {
        Self {
            content: content.into(),
            source_id: source_id.into(),
            raw_score,
            quality_score: 0.0,
            flags: Vec::new(),
            metadata: Metadata::new(),
        }
    }
}

// =============================================================================
// Memory
// =============================================================================

/// One of the four bounded memory stores.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    ShortTerm,
    Working,
    LongTerm,
    ToolCache,
}

impl MemoryTier {
    pub const ALL: [MemoryTier; 4] = [
        MemoryTier::ShortTerm,
        MemoryTier::Working,
        MemoryTier::LongTerm,
        MemoryTier::ToolCache,
    ];
}

impl fmt::Display for MemoryTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryTier::ShortTerm => write!(f, "short_term"),
            MemoryTier::Working => write!(f, "working"),
            MemoryTier::LongTerm => write!(f, "long_term"),
            MemoryTier::ToolCache => write!(f, "tool_cache"),
        }
    }
}

/// A conversational fact or snippet held by the memory manager.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: Uuid,
    pub tier: MemoryTier,
    pub content: String,
    /// Relevance in [0, 1].
    pub relevance: f32,
    pub inserted_at: Timestamp,
    #[serde(default)]
    pub metadata: Metadata,
}

impl MemoryItem {
    pub fn new(tier: MemoryTier, content: impl Into<String>, relevance: f32) -> Self {
        Self {
            id: Uuid::new_v4(),
            tier,
            content: content.into(),
            relevance: relevance.clamp(0.0, 1.0),
            inserted_at: Timestamp::now(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_inserted_at(mut self, at: Timestamp) -> Self {
        self.inserted_at = at;
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

// =============================================================================
// Errors recorded on a session
// =============================================================================

/// Category of a recorded session error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Input,
    CollaboratorTimeout,
    Collaborator,
    StateCorruption,
    Capacity,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Input => write!(f, "input"),
            ErrorKind::CollaboratorTimeout => write!(f, "collaborator_timeout"),
            ErrorKind::Collaborator => write!(f, "collaborator"),
            ErrorKind::StateCorruption => write!(f, "state_corruption"),
            ErrorKind::Capacity => write!(f, "capacity"),
        }
    }
}

/// One entry of a session's bounded error log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    pub at: Timestamp,
}

// =============================================================================
// Session
// =============================================================================

/// Running mean of per-turn answer quality.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityTally {
    pub total: f32,
    pub samples: u32,
}

impl QualityTally {
    pub fn record(&mut self, score: f32) {
        self.total += score.clamp(0.0, 1.0);
        self.samples += 1;
    }

    /// Mean of recorded scores; 0 when nothing was recorded.
    pub fn mean(&self) -> f32 {
        if self.samples == 0 {
            0.0
        } else {
            self.total / self.samples as f32
        }
    }
}

/// One conversation thread.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub conversation_id: Uuid,
    pub turns: Vec<Turn>,
    pub phase: Phase,
    pub turn_count: u32,
    pub started_at: Timestamp,
    pub last_activity: Timestamp,
    /// Ordered by most recent mention, oldest first.
    pub topics_discussed: Vec<String>,
    pub error_log: Vec<ErrorRecord>,
    pub retry_count: u32,
    #[serde(default)]
    pub quality: QualityTally,
}

impl Session {
    /// Create a session in the `Greeting` phase.
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Timestamp::now();
        Self {
            session_id: session_id.into(),
            conversation_id: Uuid::new_v4(),
            turns: Vec::new(),
            phase: Phase::Greeting,
            turn_count: 0,
            started_at: now,
            last_activity: now,
            topics_discussed: Vec::new(),
            error_log: Vec::new(),
            retry_count: 0,
            quality: QualityTally::default(),
        }
    }

    /// Append a turn, keeping at most `window` turns.
    pub fn append_turn(&mut self, turn: Turn, window: usize) {
        self.turns.push(turn);
        if self.turns.len() > window {
            let excess = self.turns.len() - window;
            self.turns.drain(..excess);
        }
    }

    /// Record a topic as most recently discussed, keeping at most `capacity`.
    pub fn note_topic(&mut self, topic: &str, capacity: usize) {
        let topic = topic.trim().to_lowercase();
        if topic.is_empty() || capacity == 0 {
            return;
        }
        self.topics_discussed.retain(|t| *t != topic);
        self.topics_discussed.push(topic);
        if self.topics_discussed.len() > capacity {
            let excess = self.topics_discussed.len() - capacity;
            self.topics_discussed.drain(..excess);
        }
    }

    /// Append to the error log, keeping at most `capacity` records.
    pub fn record_error(&mut self, kind: ErrorKind, message: impl Into<String>, capacity: usize) {
        self.error_log.push(ErrorRecord {
            kind,
            message: message.into(),
            at: Timestamp::now(),
        });
        if self.error_log.len() > capacity {
            let excess = self.error_log.len() - capacity;
            self.error_log.drain(..excess);
        }
    }

    /// The last `n` turns, oldest first.
    pub fn recent_turns(&self, n: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }

    /// Query awaiting clarification, when the session sits in `Clarifying`.
    pub fn pending_query(&self) -> Option<&str> {
        if self.phase != Phase::Clarifying {
            return None;
        }
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == Role::Assistant)
            .and_then(|t| t.metadata.get(PENDING_QUERY_KEY))
            .and_then(|v| v.as_str())
    }

    /// Whether the session has been idle for longer than `timeout_secs`.
    pub fn is_idle(&self, now: Timestamp, timeout_secs: i64) -> bool {
        now.secs_since(self.last_activity) > timeout_secs
    }

    /// Check the structural invariants of the session.
    ///
    /// Returns a description of the first violation found.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        if self.phase == Phase::Greeting && self.turn_count > 0 {
            return Err(format!(
                "phase is greeting after {} turns",
                self.turn_count
            ));
        }
        if self.phase != Phase::Greeting && self.turn_count == 0 {
            return Err(format!("phase is {} before the first turn", self.phase));
        }
        let user_turns = self.turns.iter().filter(|t| t.role == Role::User).count();
        if user_turns > self.turn_count as usize {
            return Err(format!(
                "{} user turns recorded but turn count is {}",
                user_turns, self.turn_count
            ));
        }
        if self
            .turns
            .windows(2)
            .any(|w| w[1].timestamp < w[0].timestamp)
        {
            return Err("turn history is out of order".to_string());
        }
        Ok(())
    }

    /// Build the persisted checkpoint representation.
    pub fn checkpoint(&self) -> SessionCheckpoint {
        SessionCheckpoint {
            session_id: self.session_id.clone(),
            conversation_id: self.conversation_id,
            messages: self.turns.clone(),
            phase: self.phase,
            turn_count: self.turn_count,
            last_activity: self.last_activity,
            topics_discussed: self.topics_discussed.clone(),
            retry_count: self.retry_count,
            error_log: self.error_log.clone(),
            quality: self.quality,
            started_at: Some(self.started_at),
        }
    }

    /// Rebuild a session from a checkpoint.
    ///
    /// Checkpoints written without the counter fields restore with fresh
    /// counters and a start time taken from the oldest message.
    pub fn from_checkpoint(checkpoint: SessionCheckpoint) -> Self {
        let started_at = checkpoint.started_at.unwrap_or_else(|| {
            checkpoint
                .messages
                .first()
                .map(|t| t.timestamp)
                .unwrap_or(checkpoint.last_activity)
        });
        Self {
            session_id: checkpoint.session_id,
            conversation_id: checkpoint.conversation_id,
            turns: checkpoint.messages,
            phase: checkpoint.phase,
            turn_count: checkpoint.turn_count,
            started_at,
            last_activity: checkpoint.last_activity,
            topics_discussed: checkpoint.topics_discussed,
            error_log: checkpoint.error_log,
            retry_count: checkpoint.retry_count,
            quality: checkpoint.quality,
        }
    }
}

/// Serializable snapshot used to resume a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionCheckpoint {
    pub session_id: String,
    pub conversation_id: Uuid,
    pub messages: Vec<Turn>,
    pub phase: Phase,
    pub turn_count: u32,
    pub last_activity: Timestamp,
    pub topics_discussed: Vec<String>,
    /// Consecutive clarifications since the last answer.
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub error_log: Vec<ErrorRecord>,
    #[serde(default)]
    pub quality: QualityTally,
    #[serde(default)]
    pub started_at: Option<Timestamp>,
}

impl SessionCheckpoint {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Why a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Goodbye,
    TurnLimit,
    RetryLimit,
    ErrorLimit,
    Explicit,
    IdleTimeout,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::Goodbye => write!(f, "goodbye"),
            EndReason::TurnLimit => write!(f, "turn_limit"),
            EndReason::RetryLimit => write!(f, "retry_limit"),
            EndReason::ErrorLimit => write!(f, "error_limit"),
            EndReason::Explicit => write!(f, "explicit"),
            EndReason::IdleTimeout => write!(f, "idle_timeout"),
        }
    }
}

/// End-of-session report handed to the summary sink.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub conversation_id: Uuid,
    pub turn_count: u32,
    pub topics_discussed: Vec<String>,
    pub quality_score: f32,
    pub duration_secs: i64,
    pub ended_at: Timestamp,
    pub reason: EndReason,
}

/// Lightweight listing entry for an active session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub phase: Phase,
    pub turn_count: u32,
    pub last_activity: Timestamp,
}
