//! Error types for the extract module.

use thiserror::Error;

/// Errors that can occur during extraction.
///
/// Note that malformed HTML is *not* an error: the parser recovers using
/// standard error-recovery rules. Only content that is not HTML at all
/// produces [`ExtractError::UnparsableDocument`].
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The payload is not an HTML document (content-type mismatch or binary
    /// garbage).
    #[error("unparsable document from {uri}: {reason}")]
    UnparsableDocument {
        /// Source URI of the document.
        uri: String,
        /// Why the payload was rejected.
        reason: String,
    },

    /// The ruleset itself is invalid (bad selector or pattern).
    #[error("invalid ruleset: {detail}")]
    RulesetInvalid {
        /// Which rule failed to compile and why.
        detail: String,
    },
}

impl ExtractError {
    /// Creates an unparsable-document error.
    pub fn unparsable(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnparsableDocument {
            uri: uri.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid-ruleset error.
    pub fn ruleset_invalid(detail: impl Into<String>) -> Self {
        Self::RulesetInvalid {
            detail: detail.into(),
        }
    }
}
