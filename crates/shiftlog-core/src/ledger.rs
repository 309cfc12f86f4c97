//! Applied-change ledger.
//!
//! The ledger lives inside the target store and is only reachable through a
//! store's transaction handle, so a ledger write always commits or rolls
//! back together with the change it records.

use crate::changelog::{ChangeSetId, Checksum};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a change-set came to be recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecType {
    /// Operations ran for the first time.
    Executed,
    /// Operations ran again after a definition change (`run_on_change`).
    Reran,
    /// Recorded without running, because a precondition said so.
    MarkRan,
}

impl ExecType {
    /// Stored text form.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecType::Executed => "executed",
            ExecType::Reran => "reran",
            ExecType::MarkRan => "mark_ran",
        }
    }

    /// Parse the stored text form.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "executed" => Some(ExecType::Executed),
            "reran" => Some(ExecType::Reran),
            "mark_ran" => Some(ExecType::MarkRan),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExecType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedRecord {
    /// Change-set identity.
    pub id: ChangeSetId,
    /// Checksum at time of application.
    pub checksum: Checksum,
    /// When the change-set was applied.
    pub executed_at: DateTime<Utc>,
    /// Position in the ledger (1-based, increasing).
    pub order_executed: u64,
    /// How the entry was produced.
    pub exec_type: ExecType,
    /// Change-set comment at time of application.
    pub comment: Option<String>,
}

/// Ledger access within an open store transaction.
///
/// `Error` is the transaction's error type, so ledger failures abort the
/// enclosing unit the same way operation failures do.
pub trait AppliedChangeLedger {
    /// Error produced by the ledger.
    type Error;

    /// Find the record for a change-set.
    fn find(&self, id: &ChangeSetId) -> Result<Option<AppliedRecord>, Self::Error>;

    /// Whether the change-set has a record.
    fn has_applied(&self, id: &ChangeSetId) -> Result<bool, Self::Error> {
        Ok(self.find(id)?.is_some())
    }

    /// Next free `order_executed` value.
    fn next_order(&self) -> Result<u64, Self::Error>;

    /// Write a record. `Reran` replaces the existing record for the same
    /// identity; every other kind must be new.
    fn record(&self, record: &AppliedRecord) -> Result<(), Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_type_text_round_trip() {
        for exec_type in [ExecType::Executed, ExecType::Reran, ExecType::MarkRan] {
            assert_eq!(ExecType::parse(exec_type.as_str()), Some(exec_type));
        }
        assert_eq!(ExecType::parse("EXECUTED"), None);
    }

    #[test]
    fn test_record_serializes_with_snake_case_exec_type() {
        let record = AppliedRecord {
            id: ChangeSetId::new("alice", "1"),
            checksum: Checksum::from_recorded("v1:abc"),
            executed_at: Utc::now(),
            order_executed: 1,
            exec_type: ExecType::MarkRan,
            comment: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["exec_type"], "mark_ran");
        assert_eq!(json["checksum"], "v1:abc");
        let back: AppliedRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
