//! Error types for the memory manager.

use colloquy_core::types::MemoryTier;

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("{tier} tier cannot hold {len} item(s) with capacity {capacity}")]
    Capacity {
        tier: MemoryTier,
        capacity: usize,
        len: usize,
    },
    #[error("memory lock poisoned: {0}")]
    LockPoisoned(String),
}
