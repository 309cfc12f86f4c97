//! Shiftlog Command-Line Runner
//!
//! Applies change-log documents to a SQLite or sled database and reports
//! their status.

mod commands;
mod formatter;

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use formatter::OutputFormat;
use shiftlog_core::RunnerConfig;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Shiftlog schema change-log runner
#[derive(Parser, Debug)]
#[command(name = "shiftlog")]
#[command(version, about = "Shiftlog schema change-log runner", long_about = None)]
pub struct Args {
    /// Target store type
    #[arg(long, value_enum, default_value = "sqlite", env = "SHIFTLOG_STORE")]
    pub store: StoreChoice,

    /// Path to the target database (SQLite file or sled directory)
    #[arg(short, long, env = "SHIFTLOG_DATABASE")]
    pub database: PathBuf,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    pub log_format: LogFormat,

    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

/// Target store type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreChoice {
    /// SQLite database file
    Sqlite,
    /// Sled database directory
    Sled,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text
    Text,
    /// One JSON object per line
    Json,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Apply pending change-sets
    Update(UpdateArgs),
    /// Show the status of every change-set
    Status(StatusArgs),
    /// Check the change-log for checksum conflicts
    Validate {
        /// Change-log document
        #[arg(short, long)]
        changelog: PathBuf,
    },
    /// List applied change-sets in order
    History,
    /// Force-release a stale store lock
    ReleaseLock,
}

/// Arguments for `update`.
#[derive(ClapArgs, Debug)]
pub struct UpdateArgs {
    /// Change-log document
    #[arg(short, long)]
    pub changelog: PathBuf,

    /// Active context (repeatable)
    #[arg(long = "context", value_name = "NAME")]
    pub contexts: Vec<String>,

    /// Report what would run without applying anything
    #[arg(long)]
    pub dry_run: bool,

    /// Name recorded in the store lock
    #[arg(long)]
    pub lock_owner: Option<String>,
}

/// Arguments for `status`.
#[derive(ClapArgs, Debug)]
pub struct StatusArgs {
    /// Change-log document
    #[arg(short, long)]
    pub changelog: PathBuf,

    /// Active context (repeatable)
    #[arg(long = "context", value_name = "NAME")]
    pub contexts: Vec<String>,
}

impl Args {
    /// Build the runner configuration for the selected command.
    pub fn runner_config(&self) -> RunnerConfig {
        match &self.command {
            Command::Update(update) => {
                let config = RunnerConfig::default()
                    .with_contexts(update.contexts.iter().cloned())
                    .with_dry_run(update.dry_run);
                match &update.lock_owner {
                    Some(owner) => config.with_lock_owner(owner.clone()),
                    None => config,
                }
            }
            Command::Status(status) => {
                RunnerConfig::default().with_contexts(status.contexts.iter().cloned())
            }
            _ => RunnerConfig::default(),
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "shiftlog=info,shiftlog_core=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

fn main() {
    let args = Args::parse();
    init_tracing(args.log_format);

    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        store = ?args.store,
        database = %args.database.display(),
        "starting shiftlog"
    );

    let formatter = formatter::create_formatter(args.format);
    match commands::execute(&args, &*formatter) {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("{}", formatter.format_error(&e.to_string(), e.change_set()));
            std::process::exit(e.exit_code());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_update() {
        let args = Args::try_parse_from([
            "shiftlog",
            "--database",
            "app.db",
            "update",
            "--changelog",
            "db/changelog.yaml",
            "--context",
            "dev",
            "--context",
            "test",
            "--dry-run",
        ])
        .unwrap();

        assert_eq!(args.store, StoreChoice::Sqlite);
        assert_eq!(args.format, OutputFormat::Table);
        let config = args.runner_config();
        assert!(config.dry_run);
        assert_eq!(config.contexts.len(), 2);
        assert!(config.lock_owner.starts_with("shiftlog@"));
        match args.command {
            Command::Update(update) => {
                assert_eq!(update.changelog, PathBuf::from("db/changelog.yaml"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_global_options() {
        let args = Args::try_parse_from([
            "shiftlog",
            "--store",
            "sled",
            "-d",
            "data",
            "--log-format",
            "json",
            "--format",
            "json",
            "release-lock",
        ])
        .unwrap();

        assert_eq!(args.store, StoreChoice::Sled);
        assert_eq!(args.log_format, LogFormat::Json);
        assert!(matches!(args.command, Command::ReleaseLock));
        assert!(args.runner_config().contexts.is_empty());
    }

    #[test]
    fn test_rejects_unknown_store() {
        let err = Args::try_parse_from([
            "shiftlog",
            "--store",
            "postgres",
            "--database",
            "x",
            "history",
        ]);
        assert!(err.is_err());
    }

    #[test]
    fn test_update_requires_changelog() {
        let err = Args::try_parse_from(["shiftlog", "--database", "x", "update"]);
        assert!(err.is_err());
    }
}
