//! Error taxonomy for the backend boundary
//!
//! None of these are fatal: callers degrade to synthetic or empty data.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    /// Network failure, timeout or connection refused
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Explicit not-found response (or an empty result treated as such)
    #[error("not found: {0}")]
    NotFound(String),

    /// Non-success HTTP status other than 404
    #[error("unexpected status {0}")]
    Status(u16),

    /// Body could not be decoded
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

impl FetchError {
    /// Short label used in structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Transport(_) => "transport",
            FetchError::NotFound(_) => "not_found",
            FetchError::Status(_) => "status",
            FetchError::Decode(_) => "decode",
        }
    }
}
