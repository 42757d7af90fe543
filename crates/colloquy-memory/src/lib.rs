//! Tiered conversational memory.
//!
//! Four independently bounded tiers per session (ShortTerm, Working,
//! LongTerm, ToolCache). Inserting past a tier's capacity synchronously
//! evicts the items with the lowest recency-weighted relevance.

pub mod error;
pub mod manager;
pub mod scoring;

pub use error::MemoryError;
pub use manager::MemoryManager;
pub use scoring::{eviction_score, keyword_overlap, normalize_query};
