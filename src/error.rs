// Error types for the transport and resource client layers.
// The store converts both into its single user-visible error string.

use thiserror::Error;

/// Failure of a socket connection attempt.
///
/// `Clone` because one in-flight attempt hands its result to every caller awaiting it.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("failed to open socket: {0}")]
    Connect(String),

    #[error("connection attempt was superseded by a disconnect or a newer attempt")]
    Superseded,

    #[error("connection task aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server responded with {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid request: {0}")]
    Invalid(String),
}
