//! Change-log model and loader.
//!
//! A change-log is an ordered list of change-sets. Each change-set has an
//! `(author, id)` identity, a list of typed operations, and a checksum over
//! those operations. Documents are parsed fresh on every run; nothing in
//! this module touches a store.

pub mod changeset;
pub mod checksum;
pub mod error;
pub mod loader;
pub mod operation;
pub mod precondition;

pub use changeset::{ChangeSet, ChangeSetId};
pub use checksum::Checksum;
pub use error::ParseError;
pub use loader::{ChangeLog, ChangeLogLoader, DocumentFormat};
pub use operation::{ColumnDef, ColumnType, Operation};
pub use precondition::{OnFail, Precondition, Preconditions, SchemaInspector};
