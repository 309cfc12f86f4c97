//! Store error types.

use crate::changelog::ChangeSetId;
use thiserror::Error;

/// Errors raised by a target store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Sled storage error.
    #[error("storage error: {0}")]
    Sled(#[from] sled::Error),

    /// SQLite error outside of a change-set operation.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Value encoding error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An operation of a change-set failed; the enclosing unit is rolled back.
    #[error("operation {index} ({kind}) failed: {message}")]
    Operation {
        /// Position of the operation within its change-set.
        index: usize,
        /// Operation kind.
        kind: &'static str,
        /// Store-specific failure message.
        message: String,
    },

    /// A precondition with `on_fail: halt` did not hold.
    #[error("precondition not met: {condition}")]
    PreconditionFailed {
        /// The failing condition.
        condition: String,
    },

    /// The ledger already holds a record for the change-set.
    #[error("change-set {id} is already recorded in the ledger")]
    AlreadyApplied {
        /// The change-set identity.
        id: ChangeSetId,
    },

    /// Another runner holds the store lock.
    #[error("store is locked by {owner} since {since}")]
    LockHeld {
        /// Lock holder.
        owner: String,
        /// When the lock was taken (RFC 3339).
        since: String,
    },

    /// Stored bookkeeping data could not be decoded.
    #[error("ledger data corrupted: {0}")]
    Corrupted(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::Operation {
            index: 2,
            kind: "add_column",
            message: "no such table: person".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "operation 2 (add_column) failed: no such table: person"
        );

        let err = StoreError::AlreadyApplied {
            id: ChangeSetId::new("alice", "1"),
        };
        assert!(err.to_string().contains("1::alice"));
    }
}
