//! Context validator.
//!
//! Scores retrieved chunks from their retrieval score, a suspicious-content
//! scan, and an optional external judge; drops chunks under the threshold,
//! caps the accepted set, and reports contradictions between the survivors.

pub mod conflict;
pub mod scan;
pub mod validator;

pub use conflict::{detect_conflicts, Conflict, ConflictKind};
pub use scan::{pattern_component, scan_content};
pub use validator::{ContextValidator, ValidationReport};
