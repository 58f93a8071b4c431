//! Persistence layer for camguardd
//!
//! Provides:
//! - The versioned `PersistedState` document (stats, violations, timeouts,
//!   open VC sessions, feature toggles, audit history)
//! - Audit history (append-only, pruned by age and length)
//! - A JSON file backend with atomic writes, and an in-memory backend
//! - `PersistentStateStore`: dirty tracking and flush policy

mod audit;
mod json_file;
mod persistent;
mod state;
mod traits;

pub use audit::*;
pub use json_file::*;
pub use persistent::*;
pub use state::*;
pub use traits::*;

use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Malformed state document: {0}")]
    Malformed(String),

    #[error("Unsupported state schema version: {found} (supported up to {supported})")]
    UnsupportedVersion { found: u64, supported: u32 },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
