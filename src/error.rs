// src/error.rs
// Exchange error taxonomy

use thiserror::Error;

/// Failure of a single exchange call.
///
/// None of these are retried inside a cycle: transport and rate-limit failures
/// are retried at the next scheduled cycle, auth failures fail only the affected
/// call, and rejections are final for the request that caused them.
#[derive(Error, Debug)]
pub enum ExchangeError {
    /// Connection failure or request timeout
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Signing failed, or the exchange refused our credentials
    #[error("auth error: {0}")]
    Auth(String),

    #[error("rate limited")]
    RateLimited,

    /// Exchange answered with a non-success status (insufficient balance, bad price, ...)
    #[error("rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ExchangeError {
    /// Whether the call may succeed if repeated on a later cycle
    pub fn is_transient(&self) -> bool {
        matches!(self, ExchangeError::Transport(_) | ExchangeError::RateLimited)
            || matches!(self, ExchangeError::Rejected { status, .. } if *status >= 500)
    }
}

pub type ExchangeResult<T> = std::result::Result<T, ExchangeError>;
