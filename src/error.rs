//! Typed error taxonomy. Library code returns these so callers can match on
//! kind instead of string-sniffing; `main.rs` wraps them in `anyhow` at the
//! CLI boundary the way the rest of this crate's ambient error handling does.

use thiserror::Error;

/// Failures from the pooled client talking to the upstream wall API.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("rate limited by upstream, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("credential rejected by upstream: {message}")]
    Auth { message: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("upstream returned an unexpected response: {0}")]
    Remote(String),
}

impl UpstreamError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, UpstreamError::RateLimited { .. } | UpstreamError::Transport(_))
    }
}

/// Failures from the persisted store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store conflict, retry: {0}")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[cfg(feature = "postgres")]
    #[error("postgres error: {0}")]
    Postgres(#[from] sqlx_core::error::Error),

    #[error("not found: {0}")]
    NotFound(String),
}

/// Top-level error for pipeline- and dispatcher-level operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, EngineError>;
