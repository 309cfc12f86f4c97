//! Target stores.
//!
//! A target store is the hosting application's transactional data store.
//! Every change-set is applied through [`TargetStore::apply`], which runs
//! the ledger check, the preconditions, the operations and the ledger write
//! inside a single store transaction.

mod catalog;
mod sled_store;
mod sqlite;
mod sqlite_sql;

pub use crate::error::StoreError;
pub use catalog::{IndexDef, Row, TableDef};
pub use sled_store::{SledConfig, SledStore};
pub use sqlite::SqliteStore;

use crate::changelog::{ChangeSet, OnFail, Operation, SchemaInspector};
use crate::ledger::{AppliedChangeLedger, AppliedRecord, ExecType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Which kind of store backs a runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// SQLite database.
    Sqlite,
    /// Sled catalog store.
    Sled,
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreKind::Sqlite => write!(f, "sqlite"),
            StoreKind::Sled => write!(f, "sled"),
        }
    }
}

/// Whether a change-set is applied for the first time or re-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// First application; the ledger must not know the change-set.
    Execute,
    /// Re-run of a recorded change-set whose definition changed.
    Rerun,
}

/// A request to apply one change-set.
#[derive(Debug, Clone, Copy)]
pub struct ApplyRequest<'a> {
    /// The change-set.
    pub change_set: &'a ChangeSet,
    /// First run or re-run.
    pub mode: ApplyMode,
    /// Timestamp written to the ledger.
    pub executed_at: DateTime<Utc>,
}

impl<'a> ApplyRequest<'a> {
    /// Request a first application.
    pub fn execute(change_set: &'a ChangeSet) -> Self {
        Self {
            change_set,
            mode: ApplyMode::Execute,
            executed_at: Utc::now(),
        }
    }

    /// Request a re-run.
    pub fn rerun(change_set: &'a ChangeSet) -> Self {
        Self {
            change_set,
            mode: ApplyMode::Rerun,
            executed_at: Utc::now(),
        }
    }
}

/// What happened to a change-set inside its transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// Operations ran and the record was written.
    Executed(AppliedRecord),
    /// Operations re-ran and the record was replaced.
    Reran(AppliedRecord),
    /// A precondition failed with `mark_ran`; only the record was written.
    MarkedRan(AppliedRecord),
    /// A precondition failed with `continue`; nothing was written.
    PreconditionSkipped {
        /// The failing condition.
        condition: String,
    },
}

/// Holder of the store lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Lock holder.
    pub owner: String,
    /// When the lock was taken (RFC 3339).
    pub since: String,
}

/// A transactional store that change-sets can be applied to.
pub trait TargetStore {
    /// Store kind, for logging and reporting.
    fn kind(&self) -> StoreKind;

    /// All ledger records ordered by `order_executed`.
    fn applied_records(&self) -> Result<Vec<AppliedRecord>, StoreError>;

    /// Apply one change-set atomically.
    fn apply(&mut self, request: &ApplyRequest<'_>) -> Result<ApplyOutcome, StoreError>;

    /// Take the store lock, failing with [`StoreError::LockHeld`] if taken.
    fn acquire_lock(&mut self, owner: &str) -> Result<(), StoreError>;

    /// Release the store lock. Returns whether a lock was held.
    fn release_lock(&mut self) -> Result<bool, StoreError>;

    /// Current lock holder, if any.
    fn lock_info(&self) -> Result<Option<LockInfo>, StoreError>;
}

impl<S: TargetStore + ?Sized> TargetStore for Box<S> {
    fn kind(&self) -> StoreKind {
        (**self).kind()
    }

    fn applied_records(&self) -> Result<Vec<AppliedRecord>, StoreError> {
        (**self).applied_records()
    }

    fn apply(&mut self, request: &ApplyRequest<'_>) -> Result<ApplyOutcome, StoreError> {
        (**self).apply(request)
    }

    fn acquire_lock(&mut self, owner: &str) -> Result<(), StoreError> {
        (**self).acquire_lock(owner)
    }

    fn release_lock(&mut self) -> Result<bool, StoreError> {
        (**self).release_lock()
    }

    fn lock_info(&self) -> Result<Option<LockInfo>, StoreError> {
        (**self).lock_info()
    }
}

/// Executes operations inside an open store transaction.
pub(crate) trait OperationExecutor {
    /// Error produced by the executor.
    type Error;

    /// Execute one operation. `index` is its position in the change-set.
    fn execute(&self, index: usize, operation: &Operation) -> Result<(), Self::Error>;
}

/// Body of a change-set transaction, shared by every store.
///
/// The caller commits on `Ok` and rolls back on `Err`.
pub(crate) fn apply_change_set<T, E>(tx: &T, request: &ApplyRequest<'_>) -> Result<ApplyOutcome, E>
where
    T: AppliedChangeLedger<Error = E> + SchemaInspector<Error = E> + OperationExecutor<Error = E>,
    E: From<StoreError>,
{
    let change_set = request.change_set;
    let existing = tx.find(&change_set.id)?;

    match (request.mode, &existing) {
        (ApplyMode::Execute, Some(_)) => {
            return Err(StoreError::AlreadyApplied {
                id: change_set.id.clone(),
            }
            .into());
        }
        (ApplyMode::Rerun, None) => {
            return Err(StoreError::Corrupted(format!(
                "cannot re-run {}: no ledger record",
                change_set.id
            ))
            .into());
        }
        _ => {}
    }

    if let Some(preconditions) = &change_set.preconditions {
        if let Some(failed) = preconditions.first_failure(tx)? {
            let condition = failed.describe();
            match preconditions.on_fail {
                OnFail::Halt => {
                    return Err(StoreError::PreconditionFailed { condition }.into());
                }
                OnFail::Continue => {
                    return Ok(ApplyOutcome::PreconditionSkipped { condition });
                }
                OnFail::MarkRan => {
                    let record = new_record(tx, request, ExecType::MarkRan)?;
                    tx.record(&record)?;
                    return Ok(ApplyOutcome::MarkedRan(record));
                }
            }
        }
    }

    for (index, operation) in change_set.operations.iter().enumerate() {
        debug!(
            change_set = %change_set.id,
            index,
            operation = %operation.describe(),
            "executing operation"
        );
        tx.execute(index, operation)?;
    }

    let exec_type = match request.mode {
        ApplyMode::Execute => ExecType::Executed,
        ApplyMode::Rerun => ExecType::Reran,
    };
    let record = new_record(tx, request, exec_type)?;
    tx.record(&record)?;

    Ok(match exec_type {
        ExecType::Reran => ApplyOutcome::Reran(record),
        _ => ApplyOutcome::Executed(record),
    })
}

fn new_record<T, E>(
    tx: &T,
    request: &ApplyRequest<'_>,
    exec_type: ExecType,
) -> Result<AppliedRecord, E>
where
    T: AppliedChangeLedger<Error = E>,
{
    Ok(AppliedRecord {
        id: request.change_set.id.clone(),
        checksum: request.change_set.checksum.clone(),
        executed_at: request.executed_at,
        order_executed: tx.next_order()?,
        exec_type,
        comment: request.change_set.comment.clone(),
    })
}
