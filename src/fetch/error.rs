//! Error types for the fetch module.
//!
//! Errors here are terminal from the caller's point of view: transient
//! failures are retried inside [`Fetcher::fetch`](super::Fetcher::fetch)
//! and only surface after the retry budget is exhausted.

use thiserror::Error;

/// Errors that can occur while fetching a remote document.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Request timed out and retries were exhausted.
    #[error("timeout fetching {uri}")]
    Timeout {
        /// The URI that timed out.
        uri: String,
    },

    /// Server rejected the request with a 4xx status. Never retried.
    #[error("HTTP {status} fetching {uri}: request rejected by server")]
    ClientRejected {
        /// The URI that was rejected.
        uri: String,
        /// The HTTP status code (400-499).
        status: u16,
    },

    /// Server unavailable (5xx or connection failure) after all retries.
    #[error("server unavailable fetching {uri} after {attempts} attempts")]
    ServerUnavailable {
        /// The URI that could not be fetched.
        uri: String,
        /// The last HTTP status observed, if the server responded at all.
        status: Option<u16>,
        /// Total attempts made, including the initial one.
        attempts: u32,
    },

    /// The URI or the response framing was invalid.
    #[error("malformed request/response for {uri}: {reason}")]
    Malformed {
        /// The URI involved.
        uri: String,
        /// What was wrong with it.
        reason: String,
    },
}

impl FetchError {
    /// Creates a timeout error.
    pub fn timeout(uri: impl Into<String>) -> Self {
        Self::Timeout { uri: uri.into() }
    }

    /// Creates a client-rejection error for a 4xx status.
    pub fn client_rejected(uri: impl Into<String>, status: u16) -> Self {
        Self::ClientRejected {
            uri: uri.into(),
            status,
        }
    }

    /// Creates a server-unavailable error after exhausted retries.
    pub fn server_unavailable(uri: impl Into<String>, status: Option<u16>, attempts: u32) -> Self {
        Self::ServerUnavailable {
            uri: uri.into(),
            status,
            attempts,
        }
    }

    /// Creates a malformed request/response error.
    pub fn malformed(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            uri: uri.into(),
            reason: reason.into(),
        }
    }
}

// Note on From trait implementations:
// We intentionally do NOT implement `From<reqwest::Error>` because the
// variants require context (uri, attempt count) that the source error does
// not provide. The helper constructors are the correct pattern here.
