//! Run error types.

use crate::changelog::{ChangeSetId, Checksum, ParseError};
use crate::store::StoreError;
use thiserror::Error;

/// Errors that stop a run.
#[derive(Debug, Error)]
pub enum RunError {
    /// The change-log could not be loaded.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// An applied change-set's definition no longer matches its record.
    #[error("checksum conflict for change-set {id}: recorded {recorded}, current {current}")]
    ChecksumConflict {
        /// The change-set identity.
        id: ChangeSetId,
        /// Checksum stored in the ledger.
        recorded: Checksum,
        /// Checksum of the current definition.
        current: Checksum,
    },

    /// A change-set failed and was rolled back.
    #[error("change-set {id} failed: {source}")]
    OperationFailed {
        /// The failing change-set.
        id: ChangeSetId,
        /// The store failure.
        #[source]
        source: StoreError,
    },

    /// A precondition with `on_fail: halt` did not hold.
    #[error("precondition failed for change-set {id}: {condition}")]
    PreconditionFailed {
        /// The guarded change-set.
        id: ChangeSetId,
        /// The failing condition.
        condition: String,
    },

    /// Another runner holds the store lock.
    #[error("store is locked by {owner} since {since}")]
    LockHeld {
        /// Lock holder.
        owner: String,
        /// When the lock was taken.
        since: String,
    },

    /// Store failure outside of any change-set.
    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for RunError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::LockHeld { owner, since } => RunError::LockHeld { owner, since },
            other => RunError::Store(other),
        }
    }
}

impl RunError {
    /// Map a failure of `id`'s transaction onto a run error.
    pub(crate) fn from_apply(id: &ChangeSetId, err: StoreError) -> Self {
        match err {
            StoreError::PreconditionFailed { condition } => RunError::PreconditionFailed {
                id: id.clone(),
                condition,
            },
            StoreError::LockHeld { owner, since } => RunError::LockHeld { owner, since },
            source => RunError::OperationFailed {
                id: id.clone(),
                source,
            },
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::Store(_) => 1,
            RunError::Parse(_) => 2,
            RunError::ChecksumConflict { .. } => 3,
            RunError::OperationFailed { .. } => 4,
            RunError::PreconditionFailed { .. } => 5,
            RunError::LockHeld { .. } => 6,
        }
    }

    /// The change-set the error is about, if any.
    pub fn change_set(&self) -> Option<&ChangeSetId> {
        match self {
            RunError::ChecksumConflict { id, .. }
            | RunError::OperationFailed { id, .. }
            | RunError::PreconditionFailed { id, .. } => Some(id),
            _ => None,
        }
    }
}
