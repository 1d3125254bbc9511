//! Error types and failure classification for the pipeline.
//!
//! Stage errors propagate unchanged to the coordinator, which classifies
//! them once into a flat [`FailureKind`] for the caller. The kind is `Copy`
//! so that single-flight followers can adopt a leader's failure without
//! cloning the full error chain.

use std::fmt;

use thiserror::Error;

use crate::extract::ExtractError;
use crate::fetch::FetchError;
use crate::normalize::ImageError;
use crate::store::StoreError;

/// A pipeline stage error, with the original error preserved.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Document or asset fetch failed terminally.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Extraction failed.
    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// Image normalization failed.
    #[error(transparent)]
    Image(#[from] ImageError),

    /// Persistence failed (after the coordinator's single persist retry).
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The run was cancelled or its deadline expired before completion.
    #[error("ingestion cancelled before completion")]
    Cancelled,
}

impl IngestError {
    /// Classifies this error for the caller.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Fetch(FetchError::Timeout { .. }) => FailureKind::FetchTimeout,
            Self::Fetch(FetchError::ClientRejected { .. }) => FailureKind::FetchClientRejected,
            Self::Fetch(FetchError::ServerUnavailable { .. }) => {
                FailureKind::FetchServerUnavailable
            }
            Self::Fetch(FetchError::Malformed { .. }) => FailureKind::FetchMalformed,
            Self::Extract(ExtractError::UnparsableDocument { .. }) => {
                FailureKind::ExtractUnparsable
            }
            Self::Extract(ExtractError::RulesetInvalid { .. }) => {
                FailureKind::ExtractRulesetInvalid
            }
            Self::Image(ImageError::UnsupportedFormat { .. }) => {
                FailureKind::ImageUnsupportedFormat
            }
            Self::Image(ImageError::DecodeFailed { .. }) => FailureKind::ImageDecodeFailed,
            Self::Image(ImageError::TooLarge { .. }) => FailureKind::ImageTooLarge,
            Self::Store(StoreError::TransactionFailed { .. }) => {
                FailureKind::StoreTransactionFailed
            }
            Self::Store(StoreError::Unavailable { .. }) => FailureKind::StoreUnavailable,
            Self::Cancelled => FailureKind::Cancelled,
        }
    }
}

/// Flat classification of a failed ingestion, reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Fetch timed out after retries.
    FetchTimeout,
    /// Server rejected the request with a 4xx status.
    FetchClientRejected,
    /// Server unavailable after retries.
    FetchServerUnavailable,
    /// Invalid URI or response framing.
    FetchMalformed,
    /// Payload was not an HTML document.
    ExtractUnparsable,
    /// The supplied ruleset failed to compile.
    ExtractRulesetInvalid,
    /// Asset payload in an unrecognized image format.
    ImageUnsupportedFormat,
    /// Asset payload failed to decode.
    ImageDecodeFailed,
    /// Asset exceeded the pixel-area bound.
    ImageTooLarge,
    /// Store transaction failed twice.
    StoreTransactionFailed,
    /// Store unreachable.
    StoreUnavailable,
    /// Run cancelled or deadline expired.
    Cancelled,
    /// Worker infrastructure failure (task panic, closed semaphore).
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FetchTimeout => "fetch_timeout",
            Self::FetchClientRejected => "fetch_client_rejected",
            Self::FetchServerUnavailable => "fetch_server_unavailable",
            Self::FetchMalformed => "fetch_malformed",
            Self::ExtractUnparsable => "extract_unparsable",
            Self::ExtractRulesetInvalid => "extract_ruleset_invalid",
            Self::ImageUnsupportedFormat => "image_unsupported_format",
            Self::ImageDecodeFailed => "image_decode_failed",
            Self::ImageTooLarge => "image_too_large",
            Self::StoreTransactionFailed => "store_transaction_failed",
            Self::StoreUnavailable => "store_unavailable",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_errors_classify_by_variant() {
        let e: IngestError = FetchError::timeout("http://x.test").into();
        assert_eq!(e.kind(), FailureKind::FetchTimeout);

        let e: IngestError = FetchError::client_rejected("http://x.test", 404).into();
        assert_eq!(e.kind(), FailureKind::FetchClientRejected);

        let e: IngestError = FetchError::server_unavailable("http://x.test", Some(503), 3).into();
        assert_eq!(e.kind(), FailureKind::FetchServerUnavailable);
    }

    #[test]
    fn test_image_errors_classify_by_variant() {
        let e: IngestError = ImageError::TooLarge {
            width: 100_000,
            height: 100_000,
            max_area: 1,
        }
        .into();
        assert_eq!(e.kind(), FailureKind::ImageTooLarge);
    }

    #[test]
    fn test_store_errors_classify_by_variant() {
        let e: IngestError = StoreError::transaction_failed("boom").into();
        assert_eq!(e.kind(), FailureKind::StoreTransactionFailed);

        let e: IngestError = StoreError::unavailable("gone").into();
        assert_eq!(e.kind(), FailureKind::StoreUnavailable);
    }

    #[test]
    fn test_failure_kind_display_is_snake_case() {
        assert_eq!(FailureKind::FetchTimeout.to_string(), "fetch_timeout");
        assert_eq!(FailureKind::Cancelled.to_string(), "cancelled");
    }
}
