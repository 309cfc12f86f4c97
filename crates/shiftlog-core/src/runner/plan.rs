//! Classification of a change-log against the ledger.

use crate::changelog::{ChangeLog, ChangeSet};
use crate::ledger::AppliedRecord;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

/// What a run will do with a change-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Not yet applied; will run.
    Pending,
    /// Applied with a matching (or accepted) checksum; will be skipped.
    Applied,
    /// Applied, changed, and marked `run_on_change`; will re-run.
    Rerun,
    /// Excluded by the active contexts.
    Filtered,
    /// Applied, changed, and not allowed to re-run.
    Conflict,
}

impl Disposition {
    /// Text form used in reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Pending => "pending",
            Disposition::Applied => "applied",
            Disposition::Rerun => "rerun",
            Disposition::Filtered => "filtered",
            Disposition::Conflict => "conflict",
        }
    }
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One change-set with its ledger record and disposition.
#[derive(Debug, Clone)]
pub struct PlanEntry<'a> {
    /// The change-set.
    pub change_set: &'a ChangeSet,
    /// Its ledger record, if any.
    pub record: Option<AppliedRecord>,
    /// What the run will do with it.
    pub disposition: Disposition,
}

/// A change-log classified against the ledger, in document order.
#[derive(Debug, Clone)]
pub struct RunPlan<'a> {
    entries: Vec<PlanEntry<'a>>,
}

impl<'a> RunPlan<'a> {
    /// Classify every change-set of `changelog`.
    ///
    /// Conflicts are reported even for change-sets the active contexts
    /// would filter out.
    pub fn build(
        changelog: &'a ChangeLog,
        records: Vec<AppliedRecord>,
        contexts: &BTreeSet<String>,
    ) -> Self {
        let mut by_id: HashMap<_, _> = records.into_iter().map(|r| (r.id.clone(), r)).collect();

        let entries = changelog
            .iter()
            .map(|change_set| {
                let record = by_id.remove(&change_set.id);
                let selected = change_set.matches_contexts(contexts);
                let disposition = match &record {
                    Some(record) if change_set.accepts_checksum(&record.checksum) => {
                        Disposition::Applied
                    }
                    Some(_) if !change_set.run_on_change => Disposition::Conflict,
                    _ if !selected => Disposition::Filtered,
                    Some(_) => Disposition::Rerun,
                    None => Disposition::Pending,
                };
                PlanEntry {
                    change_set,
                    record,
                    disposition,
                }
            })
            .collect();

        Self { entries }
    }

    /// Entries in document order.
    pub fn entries(&self) -> &[PlanEntry<'a>] {
        &self.entries
    }

    /// The first conflicting entry, if any.
    pub fn first_conflict(&self) -> Option<&PlanEntry<'a>> {
        self.entries
            .iter()
            .find(|e| e.disposition == Disposition::Conflict)
    }

    /// Entries that a run would execute (pending or re-run).
    pub fn to_run(&self) -> impl Iterator<Item = &PlanEntry<'a>> {
        self.entries.iter().filter(|e| {
            matches!(e.disposition, Disposition::Pending | Disposition::Rerun)
        })
    }

    /// Number of entries with the given disposition.
    pub fn count(&self, disposition: Disposition) -> usize {
        self.entries
            .iter()
            .filter(|e| e.disposition == disposition)
            .count()
    }
}
