//! Run reports.

use super::plan::{Disposition, PlanEntry};
use crate::changelog::{ChangeSetId, Checksum};
use crate::ledger::ExecType;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// A change-set skipped because a `continue` precondition failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedChangeSet {
    /// The change-set.
    pub id: ChangeSetId,
    /// The failing condition.
    pub condition: String,
}

/// Summary of one `update` run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Whether the run was a dry run.
    pub dry_run: bool,
    /// Executed for the first time.
    pub applied: Vec<ChangeSetId>,
    /// Re-run because their definition changed.
    pub reran: Vec<ChangeSetId>,
    /// Recorded without running (`on_fail: mark_ran`).
    pub marked_ran: Vec<ChangeSetId>,
    /// Skipped this run (`on_fail: continue`).
    pub precondition_skipped: Vec<SkippedChangeSet>,
    /// Already in the ledger.
    pub already_applied: Vec<ChangeSetId>,
    /// Excluded by contexts.
    pub filtered: Vec<ChangeSetId>,
    /// Would run (dry run only).
    pub pending: Vec<ChangeSetId>,
}

impl RunReport {
    /// Whether the run changed the store.
    pub fn changed(&self) -> bool {
        !(self.applied.is_empty() && self.reran.is_empty() && self.marked_ran.is_empty())
    }

    /// Whether nothing was, or would be, run.
    pub fn is_up_to_date(&self) -> bool {
        !self.changed() && self.pending.is_empty() && self.precondition_skipped.is_empty()
    }
}

/// Status of one change-set against the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeSetStatus {
    /// The change-set.
    pub id: ChangeSetId,
    /// Classification.
    pub disposition: Disposition,
    /// Checksum of the current definition.
    pub checksum: Checksum,
    /// Checksum in the ledger, when applied.
    pub recorded_checksum: Option<Checksum>,
    /// When it was applied.
    pub executed_at: Option<DateTime<Utc>>,
    /// How it was applied.
    pub exec_type: Option<ExecType>,
    /// Document it came from.
    pub source: PathBuf,
}

impl From<&PlanEntry<'_>> for ChangeSetStatus {
    fn from(entry: &PlanEntry<'_>) -> Self {
        Self {
            id: entry.change_set.id.clone(),
            disposition: entry.disposition,
            checksum: entry.change_set.checksum.clone(),
            recorded_checksum: entry.record.as_ref().map(|r| r.checksum.clone()),
            executed_at: entry.record.as_ref().map(|r| r.executed_at),
            exec_type: entry.record.as_ref().map(|r| r.exec_type),
            source: entry.change_set.source.clone(),
        }
    }
}
