//! Output formatters for run reports, status and history.

use clap::ValueEnum;
use comfy_table::{Cell, Table};
use shiftlog_core::{AppliedRecord, ChangeSetId, ChangeSetStatus, RunReport};

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter: Send + Sync {
    /// Format the report of an `update` run.
    fn format_report(&self, report: &RunReport) -> String;

    /// Format change-set statuses.
    fn format_status(&self, statuses: &[ChangeSetStatus]) -> String;

    /// Format ledger history.
    fn format_history(&self, records: &[AppliedRecord]) -> String;

    /// Format an error message, naming the change-set it concerns.
    fn format_error(&self, error: &str, change_set: Option<&ChangeSetId>) -> String;

    /// Format a simple message.
    fn format_message(&self, message: &str) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_report(&self, report: &RunReport) -> String {
        if report.is_up_to_date() {
            return format!(
                "Up to date ({} change-set(s) already applied, {} filtered)",
                report.already_applied.len(),
                report.filtered.len()
            );
        }

        let mut table = Table::new();
        table.set_header(vec!["Change-set", "Result"]);

        let groups: [(&[ChangeSetId], &str); 5] = [
            (report.applied.as_slice(), "applied"),
            (report.reran.as_slice(), "re-run"),
            (report.marked_ran.as_slice(), "marked ran"),
            (report.pending.as_slice(), "pending"),
            (report.filtered.as_slice(), "filtered"),
        ];
        for (ids, label) in groups {
            for id in ids {
                table.add_row(vec![Cell::new(id), Cell::new(label)]);
            }
        }
        for skipped in &report.precondition_skipped {
            table.add_row(vec![
                Cell::new(&skipped.id),
                Cell::new(format!("skipped: {}", skipped.condition)),
            ]);
        }

        let title = if report.dry_run { "Dry run" } else { "Update" };
        format!(
            "{} ({} already applied)\n{}",
            title,
            report.already_applied.len(),
            table
        )
    }

    fn format_status(&self, statuses: &[ChangeSetStatus]) -> String {
        if statuses.is_empty() {
            return "No change-sets".to_string();
        }

        let mut table = Table::new();
        table.set_header(vec!["Change-set", "Status", "Executed at", "Checksum", "Source"]);
        for status in statuses {
            table.add_row(vec![
                Cell::new(&status.id),
                Cell::new(status.disposition),
                Cell::new(
                    status
                        .executed_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_default(),
                ),
                Cell::new(&status.checksum),
                Cell::new(status.source.display()),
            ]);
        }
        table.to_string()
    }

    fn format_history(&self, records: &[AppliedRecord]) -> String {
        if records.is_empty() {
            return "No change-sets applied".to_string();
        }

        let mut table = Table::new();
        table.set_header(vec!["#", "Change-set", "Executed at", "Type", "Checksum", "Comment"]);
        for record in records {
            table.add_row(vec![
                Cell::new(record.order_executed),
                Cell::new(&record.id),
                Cell::new(record.executed_at.to_rfc3339()),
                Cell::new(record.exec_type),
                Cell::new(&record.checksum),
                Cell::new(record.comment.as_deref().unwrap_or("")),
            ]);
        }
        table.to_string()
    }

    fn format_error(&self, error: &str, change_set: Option<&ChangeSetId>) -> String {
        match change_set {
            Some(id) => format!("Error: {}\nChange-set: {}", error, id),
            None => format!("Error: {}", error),
        }
    }

    fn format_message(&self, message: &str) -> String {
        message.to_string()
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format_report(&self, report: &RunReport) -> String {
        serde_json::to_string_pretty(report).unwrap_or_else(|_| "{}".to_string())
    }

    fn format_status(&self, statuses: &[ChangeSetStatus]) -> String {
        serde_json::to_string_pretty(statuses).unwrap_or_else(|_| "[]".to_string())
    }

    fn format_history(&self, records: &[AppliedRecord]) -> String {
        serde_json::to_string_pretty(records).unwrap_or_else(|_| "[]".to_string())
    }

    fn format_error(&self, error: &str, change_set: Option<&ChangeSetId>) -> String {
        serde_json::json!({
            "error": error,
            "change_set": change_set.map(|id| id.to_string()),
        })
        .to_string()
    }

    fn format_message(&self, message: &str) -> String {
        serde_json::json!({
            "message": message
        })
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shiftlog_core::{Checksum, ExecType};

    fn record() -> AppliedRecord {
        AppliedRecord {
            id: ChangeSetId::new("alice", "1"),
            checksum: Checksum::from_recorded("v1:abc"),
            executed_at: "2024-05-01T12:00:00Z".parse().unwrap(),
            order_executed: 1,
            exec_type: ExecType::Executed,
            comment: Some("person table".to_string()),
        }
    }

    #[test]
    fn test_table_history() {
        let output = TableFormatter.format_history(&[record()]);
        assert!(output.contains("1::alice"));
        assert!(output.contains("executed"));
        assert!(output.contains("person table"));
        assert_eq!(TableFormatter.format_history(&[]), "No change-sets applied");
    }

    #[test]
    fn test_table_report() {
        let report = RunReport {
            applied: vec![ChangeSetId::new("alice", "2")],
            already_applied: vec![ChangeSetId::new("alice", "1")],
            ..Default::default()
        };
        let output = TableFormatter.format_report(&report);
        assert!(output.starts_with("Update (1 already applied)"));
        assert!(output.contains("2::alice"));

        let up_to_date = RunReport {
            already_applied: vec![ChangeSetId::new("alice", "1")],
            ..Default::default()
        };
        assert!(TableFormatter
            .format_report(&up_to_date)
            .starts_with("Up to date"));
    }

    #[test]
    fn test_json_history_round_trips() {
        let output = JsonFormatter.format_history(&[record()]);
        let parsed: Vec<AppliedRecord> = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed, vec![record()]);
    }

    #[test]
    fn test_json_error_names_change_set() {
        let id = ChangeSetId::new("alice", "1");
        let output = JsonFormatter.format_error("checksum conflict", Some(&id));
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["change_set"], "1::alice");
        assert_eq!(value["error"], "checksum conflict");
    }

    #[test]
    fn test_create_formatter() {
        let formatter = create_formatter(OutputFormat::Json);
        assert_eq!(formatter.format_message("hi"), r#"{"message":"hi"}"#);
        assert_eq!(OutputFormat::Table.to_string(), "table");
    }
}
