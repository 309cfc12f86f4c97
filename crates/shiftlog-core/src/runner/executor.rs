//! Change-set runner - applies a change-log to a target store.

use super::config::RunnerConfig;
use super::error::RunError;
use super::plan::{Disposition, RunPlan};
use super::report::{ChangeSetStatus, RunReport, SkippedChangeSet};
use crate::changelog::{ChangeLog, ChangeLogLoader};
use crate::ledger::AppliedRecord;
use crate::store::{ApplyMode, ApplyOutcome, ApplyRequest, LockInfo, TargetStore};
use chrono::Utc;
use std::path::Path;
use tracing::{debug, info, warn};

/// Applies change-logs to a target store, one atomic change-set at a time.
pub struct ChangeSetRunner<S> {
    store: S,
    config: RunnerConfig,
}

impl<S: TargetStore> ChangeSetRunner<S> {
    /// Create a runner over `store`.
    pub fn new(store: S, config: RunnerConfig) -> Self {
        Self { store, config }
    }

    /// Runner configuration.
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// The target store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Mutable access to the target store.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Give the store back.
    pub fn into_store(self) -> S {
        self.store
    }

    /// Load the change-log at `path` and apply it.
    pub fn update_from_path(&mut self, path: &Path) -> Result<RunReport, RunError> {
        let changelog = ChangeLogLoader::new().load(path)?;
        self.update(&changelog)
    }

    /// Apply every pending change-set of `changelog` in document order.
    ///
    /// Checksum conflicts are detected before anything is applied. The run
    /// stops at the first failing change-set; change-sets committed before
    /// it stay applied.
    pub fn update(&mut self, changelog: &ChangeLog) -> Result<RunReport, RunError> {
        if self.config.dry_run {
            return self.preview(changelog);
        }

        self.store.acquire_lock(&self.config.lock_owner)?;
        debug!(owner = %self.config.lock_owner, store = %self.store.kind(), "store lock acquired");

        let result = self.run_locked(changelog);

        match self.store.release_lock() {
            Ok(_) => debug!(store = %self.store.kind(), "store lock released"),
            Err(e) => {
                warn!(error = %e, "failed to release store lock");
                if result.is_ok() {
                    return Err(e.into());
                }
            }
        }
        result
    }

    fn run_locked(&mut self, changelog: &ChangeLog) -> Result<RunReport, RunError> {
        let records = self.store.applied_records()?;
        let plan = RunPlan::build(changelog, records, &self.config.contexts);
        ensure_no_conflict(&plan)?;

        info!(
            source = %changelog.source().display(),
            store = %self.store.kind(),
            change_sets = changelog.len(),
            pending = plan.to_run().count(),
            "starting update"
        );

        let mut report = RunReport::default();
        for entry in plan.entries() {
            let change_set = entry.change_set;
            let mode = match entry.disposition {
                Disposition::Applied => {
                    report.already_applied.push(change_set.id.clone());
                    continue;
                }
                Disposition::Filtered => {
                    debug!(change_set = %change_set.id, "filtered by contexts");
                    report.filtered.push(change_set.id.clone());
                    continue;
                }
                Disposition::Conflict => {
                    // Already rejected by ensure_no_conflict.
                    continue;
                }
                Disposition::Pending => ApplyMode::Execute,
                Disposition::Rerun => ApplyMode::Rerun,
            };

            let request = ApplyRequest {
                change_set,
                mode,
                executed_at: Utc::now(),
            };
            let outcome = match self.store.apply(&request) {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(change_set = %change_set.id, error = %e, "change-set rolled back");
                    return Err(RunError::from_apply(&change_set.id, e));
                }
            };

            match outcome {
                ApplyOutcome::Executed(record) => {
                    info!(
                        change_set = %record.id,
                        checksum = %record.checksum,
                        order = record.order_executed,
                        "change-set applied"
                    );
                    report.applied.push(record.id);
                }
                ApplyOutcome::Reran(record) => {
                    info!(
                        change_set = %record.id,
                        checksum = %record.checksum,
                        order = record.order_executed,
                        "change-set re-run"
                    );
                    report.reran.push(record.id);
                }
                ApplyOutcome::MarkedRan(record) => {
                    info!(change_set = %record.id, "precondition failed, change-set marked as ran");
                    report.marked_ran.push(record.id);
                }
                ApplyOutcome::PreconditionSkipped { condition } => {
                    warn!(change_set = %change_set.id, condition = %condition, "precondition failed, change-set skipped");
                    report.precondition_skipped.push(SkippedChangeSet {
                        id: change_set.id.clone(),
                        condition,
                    });
                }
            }
        }

        info!(
            applied = report.applied.len(),
            reran = report.reran.len(),
            marked_ran = report.marked_ran.len(),
            already_applied = report.already_applied.len(),
            "update finished"
        );
        Ok(report)
    }

    /// Report what `update` would do without taking the lock or opening a
    /// transaction.
    fn preview(&self, changelog: &ChangeLog) -> Result<RunReport, RunError> {
        let records = self.store.applied_records()?;
        let plan = RunPlan::build(changelog, records, &self.config.contexts);
        ensure_no_conflict(&plan)?;

        let mut report = RunReport {
            dry_run: true,
            ..Default::default()
        };
        for entry in plan.entries() {
            let id = entry.change_set.id.clone();
            match entry.disposition {
                Disposition::Applied => report.already_applied.push(id),
                Disposition::Filtered => report.filtered.push(id),
                Disposition::Pending | Disposition::Rerun => report.pending.push(id),
                Disposition::Conflict => {}
            }
        }
        info!(pending = report.pending.len(), "dry run finished");
        Ok(report)
    }

    /// Classify every change-set of `changelog` against the ledger.
    pub fn status(&self, changelog: &ChangeLog) -> Result<Vec<ChangeSetStatus>, RunError> {
        let records = self.store.applied_records()?;
        let plan = RunPlan::build(changelog, records, &self.config.contexts);
        Ok(plan.entries().iter().map(ChangeSetStatus::from).collect())
    }

    /// Check `changelog` for checksum conflicts without applying anything.
    pub fn validate(&self, changelog: &ChangeLog) -> Result<(), RunError> {
        let records = self.store.applied_records()?;
        let plan = RunPlan::build(changelog, records, &self.config.contexts);
        ensure_no_conflict(&plan)
    }

    /// Ledger records in application order.
    pub fn history(&self) -> Result<Vec<AppliedRecord>, RunError> {
        Ok(self.store.applied_records()?)
    }

    /// Current lock holder, if any.
    pub fn lock_info(&self) -> Result<Option<LockInfo>, RunError> {
        Ok(self.store.lock_info()?)
    }

    /// Force-release the store lock. Returns whether a lock was held.
    pub fn release_lock(&mut self) -> Result<bool, RunError> {
        let released = self.store.release_lock()?;
        if released {
            info!(store = %self.store.kind(), "store lock released");
        }
        Ok(released)
    }
}

fn ensure_no_conflict(plan: &RunPlan<'_>) -> Result<(), RunError> {
    match plan.first_conflict() {
        Some(entry) => {
            let recorded = entry
                .record
                .as_ref()
                .map(|r| r.checksum.clone())
                .unwrap_or_else(|| entry.change_set.checksum.clone());
            Err(RunError::ChecksumConflict {
                id: entry.change_set.id.clone(),
                recorded,
                current: entry.change_set.checksum.clone(),
            })
        }
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changelog::{ChangeSet, ColumnDef, ColumnType, OnFail, Operation, Precondition, Preconditions};
    use crate::ledger::ExecType;
    use crate::store::{SqliteStore, StoreError};

    fn create(id: &str, table: &str) -> ChangeSet {
        ChangeSet::new(
            "alice",
            id,
            vec![Operation::CreateTable {
                table: table.to_string(),
                columns: vec![ColumnDef::new("id", ColumnType::Integer).primary_key()],
            }],
        )
        .unwrap()
    }

    fn changelog(change_sets: Vec<ChangeSet>) -> ChangeLog {
        ChangeLog::from_change_sets("changelog.yaml", change_sets).unwrap()
    }

    fn runner() -> ChangeSetRunner<SqliteStore> {
        ChangeSetRunner::new(
            SqliteStore::in_memory().unwrap(),
            RunnerConfig::default().with_lock_owner("test"),
        )
    }

    #[test]
    fn test_update_applies_in_order_and_is_idempotent() {
        let mut runner = runner();
        let log = changelog(vec![create("1", "a"), create("2", "b")]);

        let report = runner.update(&log).unwrap();
        assert_eq!(
            report.applied,
            vec![
                log.change_sets()[0].id.clone(),
                log.change_sets()[1].id.clone()
            ]
        );

        let report = runner.update(&log).unwrap();
        assert!(report.is_up_to_date());
        assert_eq!(report.already_applied.len(), 2);
        assert_eq!(runner.history().unwrap().len(), 2);
        assert!(runner.lock_info().unwrap().is_none());
    }

    #[test]
    fn test_conflict_stops_before_any_mutation() {
        let mut runner = runner();
        runner.update(&changelog(vec![create("1", "a")])).unwrap();

        let edited = changelog(vec![create("1", "a_renamed"), create("2", "b")]);
        let err = runner.update(&edited).unwrap_err();
        assert!(matches!(err, RunError::ChecksumConflict { .. }));
        assert_eq!(err.exit_code(), 3);
        assert_eq!(runner.history().unwrap().len(), 1);
        assert!(runner.validate(&edited).is_err());
    }

    #[test]
    fn test_failure_halts_run_and_keeps_earlier_change_sets() {
        let mut runner = runner();
        let log = changelog(vec![
            create("1", "a"),
            create("2", "a"),
            create("3", "c"),
        ]);

        let err = runner.update(&log).unwrap_err();
        match &err {
            RunError::OperationFailed { id, source } => {
                assert_eq!(id, &log.change_sets()[1].id);
                assert!(matches!(source, StoreError::Operation { index: 0, .. }));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        let history = runner.history().unwrap();
        assert_eq!(history.len(), 1);
        assert!(runner.lock_info().unwrap().is_none());
    }

    #[test]
    fn test_dry_run_reports_without_applying() {
        let mut runner = ChangeSetRunner::new(
            SqliteStore::in_memory().unwrap(),
            RunnerConfig::default().with_dry_run(true),
        );
        let log = changelog(vec![create("1", "a")]);

        let report = runner.update(&log).unwrap();
        assert!(report.dry_run);
        assert_eq!(report.pending.len(), 1);
        assert!(runner.history().unwrap().is_empty());
    }

    #[test]
    fn test_lock_held_fails_fast() {
        let mut runner = runner();
        runner.store_mut().acquire_lock("someone-else").unwrap();

        let err = runner.update(&changelog(vec![create("1", "a")])).unwrap_err();
        assert_eq!(err.exit_code(), 6);
        assert!(runner.history().unwrap().is_empty());

        assert!(runner.release_lock().unwrap());
        runner.update(&changelog(vec![create("1", "a")])).unwrap();
    }

    #[test]
    fn test_precondition_policies() {
        let mut runner = runner();
        runner.update(&changelog(vec![create("1", "a")])).unwrap();

        let exists = Precondition::Not(Box::new(Precondition::TableExists {
            table: "a".to_string(),
        }));
        let skipped = create("2", "a")
            .with_preconditions(Preconditions::new(OnFail::Continue, vec![exists.clone()]));
        let marked = create("3", "a")
            .with_preconditions(Preconditions::new(OnFail::MarkRan, vec![exists.clone()]));
        let log = changelog(vec![create("1", "a"), skipped, marked]);

        let report = runner.update(&log).unwrap();
        assert_eq!(report.precondition_skipped.len(), 1);
        assert_eq!(report.marked_ran.len(), 1);
        let history = runner.history().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].exec_type, ExecType::MarkRan);

        let halted = create("4", "a")
            .with_preconditions(Preconditions::new(OnFail::Halt, vec![exists]));
        let err = runner
            .update(&changelog(vec![create("1", "a"), halted]))
            .unwrap_err();
        assert_eq!(err.exit_code(), 5);
    }

    #[test]
    fn test_status_reports_dispositions() {
        let mut runner = runner();
        runner.update(&changelog(vec![create("1", "a")])).unwrap();

        let log = changelog(vec![create("1", "a"), create("2", "b")]);
        let status = runner.status(&log).unwrap();
        assert_eq!(status[0].disposition, Disposition::Applied);
        assert_eq!(status[0].exec_type, Some(ExecType::Executed));
        assert_eq!(status[1].disposition, Disposition::Pending);
        assert!(status[1].recorded_checksum.is_none());
    }
}
