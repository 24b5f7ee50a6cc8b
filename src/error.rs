//! Errors at the indexing-run boundary.
//!
//! Everything below the pipeline returns `anyhow::Result`; the pipeline
//! classifies failures into [`RunError`] so that callers (the CLI, the HTTP
//! server and background jobs) can tell an unreachable store apart from bad
//! input, cancellation or a plain bug.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunError {
    /// The store did not answer the pre-flight check. Nothing was modified.
    #[error("search store is unavailable: {0}")]
    StoreUnavailable(String),

    /// The schema or response file could not be read or parsed.
    #[error("invalid input: {0}")]
    Input(String),

    #[error("indexing run was cancelled")]
    Cancelled,

    #[error("indexing run timed out after {0}s")]
    TimedOut(u64),

    /// Another run holds the single-run guard.
    #[error("an indexing run is already in progress")]
    Conflict,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl RunError {
    /// Stable machine-readable code used in HTTP error bodies and job snapshots.
    pub fn code(&self) -> &'static str {
        match self {
            RunError::StoreUnavailable(_) => "store_unavailable",
            RunError::Input(_) => "internal",
            RunError::Cancelled => "cancelled",
            RunError::TimedOut(_) => "timeout",
            RunError::Conflict => "conflict",
            RunError::Internal(_) => "internal",
        }
    }

    /// Wrap an error from reading the input files.
    pub fn input(err: anyhow::Error) -> Self {
        RunError::Input(format!("{:#}", err))
    }

    pub fn store_unavailable(err: anyhow::Error) -> Self {
        RunError::StoreUnavailable(format!("{:#}", err))
    }
}
