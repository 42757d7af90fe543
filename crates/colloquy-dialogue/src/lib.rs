//! Dialogue control and session lifecycle.
//!
//! The [`DialogueController`] advances a session through the phase machine
//! one user message at a time. The [`SessionLifecycle`] owns the registry of
//! live sessions, serializes turns per session, and finalizes sessions on
//! goodbye, explicit end, or idle timeout. [`Orchestrator`] ties both to the
//! transport-facing operations.

pub mod controller;
pub mod error;
pub mod lifecycle;
pub mod orchestrator;
pub mod phase;
pub mod response;
pub mod sweeper;
pub mod types;

pub use controller::{DialogueController, TurnOutcome};
pub use error::DialogueError;
pub use lifecycle::SessionLifecycle;
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use sweeper::Sweeper;
pub use types::{Reply, SourceRef, StartResponse, TurnResponse};
