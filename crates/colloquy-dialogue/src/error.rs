//! Error types for dialogue control and session management.

use colloquy_core::collaborator::CollaboratorError;
use colloquy_core::error::ColloquyError;
use colloquy_core::types::ErrorKind;
use colloquy_memory::MemoryError;

/// Errors from the dialogue controller and session lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum DialogueError {
    #[error("invalid input: {0}")]
    Input(String),
    #[error("{collaborator} timed out after {secs}s")]
    CollaboratorTimeout {
        collaborator: &'static str,
        secs: u64,
    },
    #[error("collaborator error: {0}")]
    Collaborator(String),
    #[error("state corruption: {0}")]
    StateCorruption(String),
    #[error("capacity error: {0}")]
    Capacity(String),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("session already exists: {0}")]
    SessionExists(String),
    #[error("session has ended: {0}")]
    SessionEnded(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl DialogueError {
    /// Error-log category, for errors that are recorded on the session.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            DialogueError::Input(_) => Some(ErrorKind::Input),
            DialogueError::CollaboratorTimeout { .. } => Some(ErrorKind::CollaboratorTimeout),
            DialogueError::Collaborator(_) | DialogueError::Storage(_) => {
                Some(ErrorKind::Collaborator)
            }
            DialogueError::StateCorruption(_) => Some(ErrorKind::StateCorruption),
            DialogueError::Capacity(_) => Some(ErrorKind::Capacity),
            DialogueError::SessionNotFound(_)
            | DialogueError::SessionExists(_)
            | DialogueError::SessionEnded(_) => None,
        }
    }

    /// Whether the controller recovers from this error inside the turn.
    /// Capacity errors are configuration problems and go to the caller.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            DialogueError::Capacity(_)
                | DialogueError::SessionNotFound(_)
                | DialogueError::SessionExists(_)
                | DialogueError::SessionEnded(_)
        )
    }
}

impl From<CollaboratorError> for DialogueError {
    fn from(err: CollaboratorError) -> Self {
        match err {
            CollaboratorError::Timeout { collaborator, secs } => {
                DialogueError::CollaboratorTimeout { collaborator, secs }
            }
            CollaboratorError::Failed(msg) | CollaboratorError::Malformed(msg) => {
                DialogueError::Collaborator(msg)
            }
        }
    }
}

impl From<MemoryError> for DialogueError {
    fn from(err: MemoryError) -> Self {
        match err {
            MemoryError::Capacity { .. } => DialogueError::Capacity(err.to_string()),
            MemoryError::LockPoisoned(_) => DialogueError::Storage(err.to_string()),
        }
    }
}

impl From<ColloquyError> for DialogueError {
    fn from(err: ColloquyError) -> Self {
        match err {
            ColloquyError::Capacity(msg) => DialogueError::Capacity(msg),
            other => DialogueError::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_core::types::MemoryTier;

    #[test]
    fn test_dialogue_error_display() {
        let err = DialogueError::Input("message exceeds 4000 characters".to_string());
        assert_eq!(err.to_string(), "invalid input: message exceeds 4000 characters");

        let err = DialogueError::CollaboratorTimeout {
            collaborator: "retrieval",
            secs: 10,
        };
        assert_eq!(err.to_string(), "retrieval timed out after 10s");

        let err = DialogueError::SessionNotFound("abc".to_string());
        assert_eq!(err.to_string(), "session not found: abc");

        let err = DialogueError::StateCorruption("phase is greeting after 3 turns".to_string());
        assert_eq!(
            err.to_string(),
            "state corruption: phase is greeting after 3 turns"
        );
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            DialogueError::Input("x".into()).kind(),
            Some(ErrorKind::Input)
        );
        assert_eq!(
            DialogueError::Collaborator("x".into()).kind(),
            Some(ErrorKind::Collaborator)
        );
        assert_eq!(DialogueError::SessionNotFound("x".into()).kind(), None);
    }

    #[test]
    fn test_recoverability() {
        assert!(DialogueError::Collaborator("x".into()).is_recoverable());
        assert!(DialogueError::StateCorruption("x".into()).is_recoverable());
        assert!(!DialogueError::Capacity("x".into()).is_recoverable());
    }

    #[test]
    fn test_from_collaborator_error() {
        let err: DialogueError = CollaboratorError::Timeout {
            collaborator: "generation",
            secs: 15,
        }
        .into();
        assert!(matches!(
            err,
            DialogueError::CollaboratorTimeout { secs: 15, .. }
        ));

        let err: DialogueError = CollaboratorError::Malformed("bad json".into()).into();
        assert!(matches!(err, DialogueError::Collaborator(_)));
    }

    #[test]
    fn test_from_memory_error() {
        let err: DialogueError = MemoryError::Capacity {
            tier: MemoryTier::Working,
            capacity: 0,
            len: 1,
        }
        .into();
        assert!(matches!(err, DialogueError::Capacity(_)));

        let err: DialogueError = MemoryError::LockPoisoned("poisoned".into()).into();
        assert!(matches!(err, DialogueError::Storage(_)));
    }

    #[test]
    fn test_from_core_error() {
        let err: DialogueError = ColloquyError::Serialization("bad checkpoint".into()).into();
        assert!(matches!(err, DialogueError::Storage(_)));
    }
}
