//! Subcommand handlers.

use crate::formatter::Formatter;
use crate::{Args, Command, StoreChoice};
use shiftlog_core::{
    ChangeLog, ChangeLogLoader, ChangeSetRunner, RunError, SledConfig, SledStore, SqliteStore,
    TargetStore,
};
use std::path::Path;

/// Open the target store selected on the command line.
pub fn open_store(choice: StoreChoice, path: &Path) -> Result<Box<dyn TargetStore>, RunError> {
    let store: Box<dyn TargetStore> = match choice {
        StoreChoice::Sqlite => Box::new(SqliteStore::open(path)?),
        StoreChoice::Sled => Box::new(SledStore::open(SledConfig::new(path))?),
    };
    Ok(store)
}

fn load(path: &Path) -> Result<ChangeLog, RunError> {
    Ok(ChangeLogLoader::new().load(path)?)
}

fn runner(args: &Args) -> Result<ChangeSetRunner<Box<dyn TargetStore>>, RunError> {
    let store = open_store(args.store, &args.database)?;
    Ok(ChangeSetRunner::new(store, args.runner_config()))
}

/// Run the selected subcommand and return its formatted output.
///
/// Change-logs are parsed before the store is opened, so a bad document
/// never touches it.
pub fn execute(args: &Args, formatter: &dyn Formatter) -> Result<String, RunError> {
    match &args.command {
        Command::Update(update) => {
            let changelog = load(&update.changelog)?;
            let report = runner(args)?.update(&changelog)?;
            Ok(formatter.format_report(&report))
        }
        Command::Status(status) => {
            let changelog = load(&status.changelog)?;
            let statuses = runner(args)?.status(&changelog)?;
            Ok(formatter.format_status(&statuses))
        }
        Command::Validate { changelog } => {
            let changelog = load(changelog)?;
            runner(args)?.validate(&changelog)?;
            Ok(formatter.format_message(&format!(
                "{}: {} change-set(s), no checksum conflicts",
                changelog.source().display(),
                changelog.len()
            )))
        }
        Command::History => {
            let history = runner(args)?.history()?;
            Ok(formatter.format_history(&history))
        }
        Command::ReleaseLock => {
            let mut runner = runner(args)?;
            let message = match runner.lock_info()? {
                Some(lock) if runner.release_lock()? => {
                    format!("Released lock held by {} since {}", lock.owner, lock.since)
                }
                _ => "Store was not locked".to_string(),
            };
            Ok(formatter.format_message(&message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formatter::{JsonFormatter, TableFormatter};
    use clap::Parser;
    use std::path::PathBuf;

    const CHANGELOG: &str = r#"
changelog:
  - changeset:
      id: "1"
      author: alice
      changes:
        - create_table:
            table: person
            columns:
              - { name: id, type: integer, primary_key: true }
  - changeset:
      id: "2"
      author: alice
      contexts: [test]
      changes:
        - insert:
            table: person
            values: { id: 1 }
"#;

    struct Fixture {
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join("changelog.yaml"), CHANGELOG).unwrap();
            Self { dir }
        }

        fn changelog(&self) -> PathBuf {
            self.dir.path().join("changelog.yaml")
        }

        fn args(&self, store: &str, rest: &[&str]) -> Args {
            let database = self.dir.path().join(format!("db-{}", store));
            let mut argv = vec![
                "shiftlog".to_string(),
                "--store".to_string(),
                store.to_string(),
                "--database".to_string(),
                database.display().to_string(),
            ];
            argv.extend(rest.iter().map(|s| s.to_string()));
            Args::try_parse_from(argv).unwrap()
        }
    }

    #[test]
    fn test_update_then_history_on_both_stores() {
        let fixture = Fixture::new();
        let changelog = fixture.changelog().display().to_string();

        for store in ["sqlite", "sled"] {
            let args = fixture.args(store, &["update", "--changelog", &changelog]);
            let output = execute(&args, &JsonFormatter).unwrap();
            let report: serde_json::Value = serde_json::from_str(&output).unwrap();
            assert_eq!(report["applied"].as_array().unwrap().len(), 2);

            let args = fixture.args(store, &["history"]);
            let output = execute(&args, &JsonFormatter).unwrap();
            let history: serde_json::Value = serde_json::from_str(&output).unwrap();
            assert_eq!(history.as_array().unwrap().len(), 2);
        }
    }

    #[test]
    fn test_status_with_contexts() {
        let fixture = Fixture::new();
        let changelog = fixture.changelog().display().to_string();

        let args = fixture.args(
            "sqlite",
            &["update", "--changelog", &changelog, "--context", "prod"],
        );
        execute(&args, &TableFormatter).unwrap();

        let args = fixture.args(
            "sqlite",
            &["status", "--changelog", &changelog, "--context", "prod"],
        );
        let output = execute(&args, &JsonFormatter).unwrap();
        let statuses: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(statuses[0]["disposition"], "applied");
        assert_eq!(statuses[1]["disposition"], "filtered");
    }

    #[test]
    fn test_validate_reports_conflict() {
        let fixture = Fixture::new();
        let changelog = fixture.changelog().display().to_string();
        let args = fixture.args("sqlite", &["update", "--changelog", &changelog]);
        execute(&args, &TableFormatter).unwrap();

        std::fs::write(
            fixture.changelog(),
            CHANGELOG.replace("type: integer", "type: text"),
        )
        .unwrap();
        let args = fixture.args("sqlite", &["validate", "--changelog", &changelog]);
        let err = execute(&args, &TableFormatter).unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert_eq!(err.change_set().unwrap().to_string(), "1::alice");
    }

    #[test]
    fn test_parse_error_exit_code() {
        let fixture = Fixture::new();
        let missing = fixture.dir.path().join("missing.yaml").display().to_string();
        let args = fixture.args("sqlite", &["update", "--changelog", &missing]);
        let err = execute(&args, &TableFormatter).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_release_lock() {
        let fixture = Fixture::new();
        let args = fixture.args("sled", &["release-lock"]);
        let output = execute(&args, &TableFormatter).unwrap();
        assert_eq!(output, "Store was not locked");

        {
            let mut store = open_store(StoreChoice::Sled, &args.database).unwrap();
            store.acquire_lock("crashed-run").unwrap();
        }
        let output = execute(&args, &TableFormatter).unwrap();
        assert!(output.starts_with("Released lock held by crashed-run"));
    }
}
