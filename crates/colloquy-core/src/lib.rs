//! Shared foundation for the Colloquy session orchestrator.
//!
//! Holds configuration, the top-level error type, the conversation data
//! model, session events, and the contracts of the external collaborators
//! (retrieval, generation, classification, persistence).

pub mod collaborator;
pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use collaborator::{
    with_timeout, CollaboratorError, ContextJudge, Generator, IntentClassifier, LongTermStore,
    RetrievedDocument, Retriever, SearchFilters, SummarySink,
};
pub use config::ColloquyConfig;
pub use error::{ColloquyError, Result};
pub use events::SessionEvent;
pub use types::*;
