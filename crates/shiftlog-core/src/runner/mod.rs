//! Change-set runner.
//!
//! The runner takes the store lock, classifies every change-set of a
//! change-log against the ledger, rejects the run if any applied change-set
//! has drifted, then applies the pending change-sets one transaction at a
//! time in document order.
//!
//! # Example
//!
//! ```ignore
//! use shiftlog_core::{ChangeLogLoader, ChangeSetRunner, RunnerConfig, SqliteStore};
//!
//! let changelog = ChangeLogLoader::new().load(Path::new("db/changelog.yaml"))?;
//! let store = SqliteStore::open(Path::new("app.db"))?;
//! let mut runner = ChangeSetRunner::new(store, RunnerConfig::default().with_context("prod"));
//! let report = runner.update(&changelog)?;
//! println!("{} change-sets applied", report.applied.len());
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod plan;
pub mod report;

pub use config::RunnerConfig;
pub use error::RunError;
pub use executor::ChangeSetRunner;
pub use plan::{Disposition, PlanEntry, RunPlan};
pub use report::{ChangeSetStatus, RunReport, SkippedChangeSet};
