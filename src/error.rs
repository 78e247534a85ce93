//! Error types shared by every engine operation.

use thiserror::Error;

/// Failure modes callers are expected to distinguish.
///
/// `MalformedTimestamp` is a per-row condition: batch operations skip the
/// offending row, keep going, and report the skip count in their summary.
/// `Storage` is fatal for the call that hit it; rows already applied by a
/// best-effort batch stay committed.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("malformed timestamp: {input:?}")]
    MalformedTimestamp { input: String },

    #[error("storage unavailable: {0}")]
    Storage(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
