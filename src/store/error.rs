//! Error types for the store module.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A transaction failed to apply (constraint violation, rollback,
    /// serialization failure). Eligible for one coordinator-level retry of
    /// the persist stage.
    #[error("store transaction failed: {detail}")]
    TransactionFailed {
        /// Underlying failure description.
        detail: String,
    },

    /// The backing store cannot be reached at all.
    #[error("store unavailable: {detail}")]
    Unavailable {
        /// Underlying failure description.
        detail: String,
    },
}

impl StoreError {
    /// Creates a transaction-failed error.
    pub fn transaction_failed(detail: impl Into<String>) -> Self {
        Self::TransactionFailed {
            detail: detail.into(),
        }
    }

    /// Creates an unavailable error.
    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self::Unavailable {
            detail: detail.into(),
        }
    }

    /// Classifies a sqlx error: pool/connection-level failures mean the
    /// store is unavailable, anything else is a failed transaction.
    pub(crate) fn from_sqlx(error: &sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::unavailable(error.to_string())
            }
            _ => Self::transaction_failed(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let error = StoreError::transaction_failed("UNIQUE constraint failed");
        assert!(error.to_string().contains("transaction failed"));

        let error = StoreError::unavailable("pool timed out");
        assert!(error.to_string().contains("unavailable"));
    }

    #[test]
    fn test_from_sqlx_classifies_pool_errors_as_unavailable() {
        let error = StoreError::from_sqlx(&sqlx::Error::PoolTimedOut);
        assert!(matches!(error, StoreError::Unavailable { .. }));

        let error = StoreError::from_sqlx(&sqlx::Error::RowNotFound);
        assert!(matches!(error, StoreError::TransactionFailed { .. }));
    }
}
