//! SQLite target store.

use super::sqlite_sql::{render, SqlStatement};
use super::{
    apply_change_set, ApplyRequest, ApplyOutcome, LockInfo, OperationExecutor, StoreError,
    StoreKind, TargetStore,
};
use crate::changelog::{ChangeSetId, Checksum, Operation, SchemaInspector};
use crate::ledger::{AppliedChangeLedger, AppliedRecord, ExecType};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use rusqlite::TransactionBehavior;
use std::path::Path;
use tracing::{debug, info};

/// Ledger table.
const LEDGER_TABLE: &str = "shiftlog_changelog";

/// Lock table.
const LOCK_TABLE: &str = "shiftlog_lock";

/// A SQLite database used as a target store.
///
/// The ledger (`shiftlog_changelog`) and lock (`shiftlog_lock`) tables live
/// next to the application's tables and are created on open.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) a database file.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        info!(path = %path.display(), "opening sqlite store");
        Self::from_connection(Connection::open(path)?)
    }

    /// Open a private in-memory database.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Wrap a connection supplied by the hosting application.
    pub fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let store = Self { conn };
        store.initialize()?;
        Ok(store)
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Give the connection back to the caller.
    pub fn into_inner(self) -> Connection {
        self.conn
    }

    fn initialize(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {LEDGER_TABLE} (
                id TEXT NOT NULL,
                author TEXT NOT NULL,
                checksum TEXT NOT NULL,
                executed_at TEXT NOT NULL,
                order_executed INTEGER NOT NULL,
                exec_type TEXT NOT NULL,
                comment TEXT,
                PRIMARY KEY (author, id)
            );
            CREATE TABLE IF NOT EXISTS {LOCK_TABLE} (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                locked_by TEXT NOT NULL,
                locked_at TEXT NOT NULL
            );"
        ))?;
        Ok(())
    }
}

impl TargetStore for SqliteStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Sqlite
    }

    fn applied_records(&self) -> Result<Vec<AppliedRecord>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT author, id, checksum, executed_at, order_executed, exec_type, comment
             FROM {LEDGER_TABLE} ORDER BY order_executed ASC"
        ))?;
        let rows = stmt.query_map([], read_record)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row??);
        }
        Ok(records)
    }

    fn apply(&mut self, request: &ApplyRequest<'_>) -> Result<ApplyOutcome, StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let outcome = apply_change_set(&SqliteUnit { conn: &tx }, request)?;
        // A `continue` precondition writes nothing; committing keeps the
        // code path uniform.
        tx.commit()?;
        debug!(change_set = %request.change_set.id, "sqlite transaction committed");
        Ok(outcome)
    }

    fn acquire_lock(&mut self, owner: &str) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let inserted = self.conn.execute(
            &format!("INSERT INTO {LOCK_TABLE} (id, locked_by, locked_at) VALUES (1, ?1, ?2)"),
            params![owner, now],
        );
        match inserted {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                let holder = self.lock_info()?.unwrap_or_else(|| LockInfo {
                    owner: "unknown".to_string(),
                    since: "unknown".to_string(),
                });
                Err(StoreError::LockHeld {
                    owner: holder.owner,
                    since: holder.since,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn release_lock(&mut self) -> Result<bool, StoreError> {
        let removed = self
            .conn
            .execute(&format!("DELETE FROM {LOCK_TABLE} WHERE id = 1"), [])?;
        Ok(removed > 0)
    }

    fn lock_info(&self) -> Result<Option<LockInfo>, StoreError> {
        let info = self
            .conn
            .query_row(
                &format!("SELECT locked_by, locked_at FROM {LOCK_TABLE} WHERE id = 1"),
                [],
                |row| {
                    Ok(LockInfo {
                        owner: row.get(0)?,
                        since: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(info)
    }
}

/// Decode a ledger row. The outer error is SQLite's; the inner one is
/// ours, for values SQLite returned fine but that do not parse.
fn read_record(row: &Row<'_>) -> rusqlite::Result<Result<AppliedRecord, StoreError>> {
    let author: String = row.get(0)?;
    let id: String = row.get(1)?;
    let checksum: String = row.get(2)?;
    let executed_at: String = row.get(3)?;
    let order_executed: i64 = row.get(4)?;
    let exec_type: String = row.get(5)?;
    let comment: Option<String> = row.get(6)?;

    Ok(decode_record(
        author,
        id,
        checksum,
        &executed_at,
        order_executed,
        &exec_type,
        comment,
    ))
}

fn decode_record(
    author: String,
    id: String,
    checksum: String,
    executed_at: &str,
    order_executed: i64,
    exec_type: &str,
    comment: Option<String>,
) -> Result<AppliedRecord, StoreError> {
    let executed_at = DateTime::parse_from_rfc3339(executed_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupted(format!("bad executed_at '{}': {}", executed_at, e)))?;
    let exec_type = ExecType::parse(exec_type)
        .ok_or_else(|| StoreError::Corrupted(format!("unknown exec_type '{}'", exec_type)))?;
    let order_executed = u64::try_from(order_executed)
        .map_err(|_| StoreError::Corrupted(format!("negative order_executed {}", order_executed)))?;

    Ok(AppliedRecord {
        id: ChangeSetId::new(author, id),
        checksum: Checksum::from_recorded(checksum),
        executed_at,
        order_executed,
        exec_type,
        comment,
    })
}

/// One change-set's view of an open SQLite transaction.
struct SqliteUnit<'a> {
    conn: &'a Connection,
}

impl AppliedChangeLedger for SqliteUnit<'_> {
    type Error = StoreError;

    fn find(&self, id: &ChangeSetId) -> Result<Option<AppliedRecord>, StoreError> {
        let found = self
            .conn
            .query_row(
                &format!(
                    "SELECT author, id, checksum, executed_at, order_executed, exec_type, comment
                     FROM {LEDGER_TABLE} WHERE author = ?1 AND id = ?2"
                ),
                params![id.author, id.id],
                read_record,
            )
            .optional()?;
        found.transpose()
    }

    fn next_order(&self) -> Result<u64, StoreError> {
        let max: i64 = self.conn.query_row(
            &format!("SELECT COALESCE(MAX(order_executed), 0) FROM {LEDGER_TABLE}"),
            [],
            |row| row.get(0),
        )?;
        Ok(max.max(0) as u64 + 1)
    }

    fn record(&self, record: &AppliedRecord) -> Result<(), StoreError> {
        let order = i64::try_from(record.order_executed)
            .map_err(|_| StoreError::Corrupted("order_executed overflow".to_string()))?;
        match record.exec_type {
            ExecType::Reran => {
                let updated = self.conn.execute(
                    &format!(
                        "UPDATE {LEDGER_TABLE}
                         SET checksum = ?3, executed_at = ?4, order_executed = ?5,
                             exec_type = ?6, comment = ?7
                         WHERE author = ?1 AND id = ?2"
                    ),
                    params![
                        record.id.author,
                        record.id.id,
                        record.checksum.as_str(),
                        record.executed_at.to_rfc3339(),
                        order,
                        record.exec_type.as_str(),
                        record.comment,
                    ],
                )?;
                if updated != 1 {
                    return Err(StoreError::Corrupted(format!(
                        "expected one ledger row for {}, updated {}",
                        record.id, updated
                    )));
                }
            }
            ExecType::Executed | ExecType::MarkRan => {
                self.conn.execute(
                    &format!(
                        "INSERT INTO {LEDGER_TABLE}
                         (author, id, checksum, executed_at, order_executed, exec_type, comment)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
                    ),
                    params![
                        record.id.author,
                        record.id.id,
                        record.checksum.as_str(),
                        record.executed_at.to_rfc3339(),
                        order,
                        record.exec_type.as_str(),
                        record.comment,
                    ],
                )?;
            }
        }
        Ok(())
    }
}

impl SchemaInspector for SqliteUnit<'_> {
    type Error = StoreError;

    fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn column_exists(&self, table: &str, column: &str) -> Result<bool, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
            params![table, column],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

impl OperationExecutor for SqliteUnit<'_> {
    type Error = StoreError;

    fn execute(&self, index: usize, operation: &Operation) -> Result<(), StoreError> {
        let failed = |message: String| StoreError::Operation {
            index,
            kind: operation.kind(),
            message,
        };

        for SqlStatement { sql, params, batch } in render(operation).map_err(&failed)? {
            if batch {
                self.execute_raw(&sql).map_err(&failed)?;
            } else {
                self.conn
                    .execute(&sql, params_from_iter(params.iter()))
                    .map_err(|e| failed(e.to_string()))?;
            }
        }
        Ok(())
    }
}

impl SqliteUnit<'_> {
    /// Run raw SQL with every commit vetoed. The change-set transaction
    /// must still be open afterwards; `COMMIT`, `END` or `ROLLBACK` in the
    /// text fail the operation and leave nothing behind.
    fn execute_raw(&self, sql: &str) -> Result<(), String> {
        self.conn.commit_hook(Some(|| true));
        let result = self.conn.execute_batch(sql);
        self.conn.commit_hook(None::<fn() -> bool>);

        if self.conn.is_autocommit() {
            let cause = result.err().map(|e| format!(" ({})", e)).unwrap_or_default();
            return Err(format!("statement ended the change-set transaction{}", cause));
        }
        result.map_err(|e| e.to_string())
    }
}
