//! Error types for the extraction engine.
//!
//! Validation failures are the only fatal errors for a run. Everything else
//! is recovered locally (session rotation, retry, degrade-open dedup) and the
//! run returns a partial result list.

use thiserror::Error;

/// Engine-level error type.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Country code is not a known ISO-3166 alpha-2 code.
    #[error("unknown country code: {0}")]
    InvalidCountry(String),

    /// State code is not known for the given country.
    #[error("unknown state code {state} for country {country}")]
    InvalidState { country: String, state: String },

    /// A filter operator or value is out of its accepted domain.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// The page pool has been closed; waiters are rejected with this.
    #[error("page pool closed")]
    PoolClosed,

    /// The browser refused to open a new page.
    #[error("failed to create page: {0}")]
    PageCreationFailed(String),

    /// The run was cancelled before producing a result.
    #[error("run cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Convenience alias for engine results.
pub type EngineResult<T> = Result<T, EngineError>;
