//! Shiftlog Core - change-log loading, ledger, and change-set runner.
//!
//! This crate reads change-log documents, tracks applied change-sets in a
//! ledger stored inside the target store, and applies pending change-sets
//! atomically against SQLite or sled.

pub mod changelog;
pub mod error;
pub mod ledger;
pub mod runner;
pub mod store;

pub use changelog::{
    ChangeLog, ChangeLogLoader, ChangeSet, ChangeSetId, Checksum, ColumnDef, ColumnType,
    DocumentFormat, OnFail, Operation, ParseError, Precondition, Preconditions, SchemaInspector,
};
pub use error::StoreError;
pub use ledger::{AppliedChangeLedger, AppliedRecord, ExecType};
pub use runner::{
    ChangeSetRunner, ChangeSetStatus, Disposition, RunError, RunPlan, RunReport, RunnerConfig,
};
pub use store::{
    ApplyMode, ApplyOutcome, ApplyRequest, LockInfo, SledConfig, SledStore, SqliteStore,
    StoreKind, TableDef, TargetStore,
};
