//! Intent & query router.
//!
//! Classifies an utterance with deterministic patterns, optionally defers to
//! an external classifier under a deadline, extracts keywords and named
//! entities, and decomposes multi-target queries into independent
//! sub-queries.

pub mod classifier;
pub mod decompose;
pub mod extract;
pub mod patterns;
pub mod router;

pub use router::IntentRouter;
