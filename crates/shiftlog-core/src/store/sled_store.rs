//! Sled target store.
//!
//! Tables live in the `shiftlog:schema` tree as serialized [`TableDef`]
//! values. The ledger and bookkeeping live in `shiftlog:ledger` and
//! `shiftlog:meta`. A change-set is applied inside one transaction spanning
//! all three trees.

use super::catalog::{IndexDef, Row, TableDef};
use super::{
    apply_change_set, ApplyOutcome, ApplyRequest, LockInfo, OperationExecutor, StoreError,
    StoreKind, TargetStore,
};
use crate::changelog::{ChangeSetId, Operation, SchemaInspector};
use crate::ledger::{AppliedChangeLedger, AppliedRecord, ExecType};
use chrono::Utc;
use serde::de::DeserializeOwned;
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
use sled::{Db, Transactional, Tree};
use std::path::PathBuf;
use tracing::{debug, info};

/// Tree holding table definitions and index names.
pub const SCHEMA_TREE: &str = "shiftlog:schema";

/// Tree holding ledger records.
pub const LEDGER_TREE: &str = "shiftlog:ledger";

/// Tree holding the order counter and the lock.
pub const META_TREE: &str = "shiftlog:meta";

const TABLE_PREFIX: &str = "table:";
const INDEX_PREFIX: &str = "index:";
const LAST_ORDER_KEY: &[u8] = b"last_order";
const LOCK_KEY: &[u8] = b"lock";

type TxResult<T> = Result<T, ConflictableTransactionError<StoreError>>;

impl From<StoreError> for ConflictableTransactionError<StoreError> {
    fn from(err: StoreError) -> Self {
        ConflictableTransactionError::Abort(err)
    }
}

fn abort(err: impl Into<StoreError>) -> ConflictableTransactionError<StoreError> {
    ConflictableTransactionError::Abort(err.into())
}

fn table_key(name: &str) -> Vec<u8> {
    format!("{TABLE_PREFIX}{name}").into_bytes()
}

fn index_key(name: &str) -> Vec<u8> {
    format!("{INDEX_PREFIX}{name}").into_bytes()
}

/// Ledger key: `author \0 id`.
fn ledger_key(id: &ChangeSetId) -> Vec<u8> {
    let mut key = Vec::with_capacity(id.author.len() + 1 + id.id.len());
    key.extend_from_slice(id.author.as_bytes());
    key.push(0);
    key.extend_from_slice(id.id.as_bytes());
    key
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Configuration for a sled store.
#[derive(Debug, Clone)]
pub struct SledConfig {
    /// Path to the database directory.
    pub path: PathBuf,
    /// Page cache capacity in bytes.
    pub cache_capacity: u64,
    /// Enable zstd compression.
    pub compression: bool,
    /// Temporary database (deleted on drop).
    pub temporary: bool,
}

impl Default for SledConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./shiftlog_data"),
            cache_capacity: 64 * 1024 * 1024,
            compression: true,
            temporary: false,
        }
    }
}

impl SledConfig {
    /// Create a configuration for the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Create a temporary configuration for testing.
    pub fn temporary() -> Self {
        Self {
            path: PathBuf::new(),
            temporary: true,
            ..Default::default()
        }
    }

    fn to_sled_config(&self) -> sled::Config {
        let config = sled::Config::new()
            .cache_capacity(self.cache_capacity)
            .use_compression(self.compression);
        if self.temporary {
            config.temporary(true)
        } else {
            config.path(&self.path)
        }
    }
}

/// A sled database used as a target store.
pub struct SledStore {
    db: Db,
    schema: Tree,
    ledger: Tree,
    meta: Tree,
}

impl SledStore {
    /// Open or create a store with the given configuration.
    pub fn open(config: SledConfig) -> Result<Self, StoreError> {
        info!(path = %config.path.display(), temporary = config.temporary, "opening sled store");
        let db = config.to_sled_config().open()?;
        Self::from_db(&db)
    }

    /// Open a temporary store.
    pub fn temporary() -> Result<Self, StoreError> {
        Self::open(SledConfig::temporary())
    }

    /// Use trees inside a database owned by the hosting application.
    pub fn from_db(db: &Db) -> Result<Self, StoreError> {
        Ok(Self {
            db: db.clone(),
            schema: db.open_tree(SCHEMA_TREE)?,
            ledger: db.open_tree(LEDGER_TREE)?,
            meta: db.open_tree(META_TREE)?,
        })
    }

    /// Get a table definition with its rows.
    pub fn table(&self, name: &str) -> Result<Option<TableDef>, StoreError> {
        match self.schema.get(table_key(name))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All tables, ordered by name.
    pub fn tables(&self) -> Result<Vec<TableDef>, StoreError> {
        let mut tables = Vec::new();
        for entry in self.schema.scan_prefix(TABLE_PREFIX.as_bytes()) {
            let (_, bytes) = entry?;
            tables.push(decode(&bytes)?);
        }
        Ok(tables)
    }

    /// Rows of a table, or `None` if the table does not exist.
    pub fn rows(&self, table: &str) -> Result<Option<Vec<Row>>, StoreError> {
        Ok(self.table(table)?.map(|t| t.rows))
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

impl TargetStore for SledStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Sled
    }

    fn applied_records(&self) -> Result<Vec<AppliedRecord>, StoreError> {
        let mut records = Vec::new();
        for entry in self.ledger.iter() {
            let (_, bytes) = entry?;
            records.push(decode::<AppliedRecord>(&bytes)?);
        }
        records.sort_by_key(|r| r.order_executed);
        Ok(records)
    }

    fn apply(&mut self, request: &ApplyRequest<'_>) -> Result<ApplyOutcome, StoreError> {
        let result: Result<ApplyOutcome, TransactionError<StoreError>> =
            (&self.schema, &self.ledger, &self.meta).transaction(|(schema, ledger, meta)| {
                let unit = SledUnit {
                    schema,
                    ledger,
                    meta,
                };
                apply_change_set(&unit, request)
            });

        match result {
            Ok(outcome) => {
                self.flush()?;
                debug!(change_set = %request.change_set.id, "sled transaction committed");
                Ok(outcome)
            }
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(StoreError::Sled(e)),
        }
    }

    fn acquire_lock(&mut self, owner: &str) -> Result<(), StoreError> {
        let info = LockInfo {
            owner: owner.to_string(),
            since: Utc::now().to_rfc3339(),
        };
        let bytes = serde_json::to_vec(&info)?;
        match self
            .meta
            .compare_and_swap(LOCK_KEY, None as Option<&[u8]>, Some(bytes))?
        {
            Ok(()) => {
                self.flush()?;
                Ok(())
            }
            Err(cas) => {
                let holder = match cas.current {
                    Some(current) => decode::<LockInfo>(&current)?,
                    None => return Err(StoreError::Corrupted("lock vanished during swap".into())),
                };
                Err(StoreError::LockHeld {
                    owner: holder.owner,
                    since: holder.since,
                })
            }
        }
    }

    fn release_lock(&mut self) -> Result<bool, StoreError> {
        let removed = self.meta.remove(LOCK_KEY)?.is_some();
        self.flush()?;
        Ok(removed)
    }

    fn lock_info(&self) -> Result<Option<LockInfo>, StoreError> {
        match self.meta.get(LOCK_KEY)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }
}

/// One change-set's view of an open sled transaction.
struct SledUnit<'a> {
    schema: &'a TransactionalTree,
    ledger: &'a TransactionalTree,
    meta: &'a TransactionalTree,
}

impl SledUnit<'_> {
    fn load_table(&self, name: &str) -> TxResult<Option<TableDef>> {
        match self.schema.get(table_key(name))? {
            Some(bytes) => Ok(Some(decode(&bytes).map_err(abort)?)),
            None => Ok(None),
        }
    }

    fn save_table(&self, table: &TableDef) -> TxResult<()> {
        let bytes = serde_json::to_vec(table).map_err(abort)?;
        self.schema.insert(table_key(&table.name), bytes)?;
        Ok(())
    }

    fn index_exists(&self, name: &str) -> TxResult<bool> {
        Ok(self.schema.get(index_key(name))?.is_some())
    }
}

impl AppliedChangeLedger for SledUnit<'_> {
    type Error = ConflictableTransactionError<StoreError>;

    fn find(&self, id: &ChangeSetId) -> TxResult<Option<AppliedRecord>> {
        match self.ledger.get(ledger_key(id))? {
            Some(bytes) => Ok(Some(decode(&bytes).map_err(abort)?)),
            None => Ok(None),
        }
    }

    fn next_order(&self) -> TxResult<u64> {
        let last = match self.meta.get(LAST_ORDER_KEY)? {
            Some(bytes) => {
                let raw = <[u8; 8]>::try_from(&bytes[..]).map_err(|_| {
                    abort(StoreError::Corrupted("bad order counter".to_string()))
                })?;
                u64::from_be_bytes(raw)
            }
            None => 0,
        };
        Ok(last + 1)
    }

    fn record(&self, record: &AppliedRecord) -> TxResult<()> {
        let key = ledger_key(&record.id);
        let exists = self.ledger.get(&key)?.is_some();
        match (record.exec_type, exists) {
            (ExecType::Reran, false) => {
                return Err(abort(StoreError::Corrupted(format!(
                    "no ledger record to replace for {}",
                    record.id
                ))));
            }
            (ExecType::Executed | ExecType::MarkRan, true) => {
                return Err(abort(StoreError::AlreadyApplied {
                    id: record.id.clone(),
                }));
            }
            _ => {}
        }

        let bytes = serde_json::to_vec(record).map_err(abort)?;
        self.ledger.insert(key, bytes)?;
        self.meta
            .insert(LAST_ORDER_KEY, &record.order_executed.to_be_bytes())?;
        Ok(())
    }
}

impl SchemaInspector for SledUnit<'_> {
    type Error = ConflictableTransactionError<StoreError>;

    fn table_exists(&self, table: &str) -> TxResult<bool> {
        Ok(self.schema.get(table_key(table))?.is_some())
    }

    fn column_exists(&self, table: &str, column: &str) -> TxResult<bool> {
        Ok(self
            .load_table(table)?
            .is_some_and(|t| t.column(column).is_some()))
    }
}

impl OperationExecutor for SledUnit<'_> {
    type Error = ConflictableTransactionError<StoreError>;

    fn execute(&self, index: usize, operation: &Operation) -> TxResult<()> {
        let fail = |message: String| {
            abort(StoreError::Operation {
                index,
                kind: operation.kind(),
                message,
            })
        };
        let require = |name: &str| -> TxResult<TableDef> {
            self.load_table(name)?
                .ok_or_else(|| fail(format!("no such table: {}", name)))
        };

        match operation {
            Operation::CreateTable { table, columns } => {
                if self.table_exists(table)? {
                    return Err(fail(format!("table {} already exists", table)));
                }
                self.save_table(&TableDef::new(table.clone(), columns.clone()))?;
            }
            Operation::DropTable { table } => {
                let def = require(table)?;
                for existing in &def.indexes {
                    self.schema.remove(index_key(&existing.name))?;
                }
                self.schema.remove(table_key(table))?;
            }
            Operation::RenameTable { from, to } => {
                let mut def = require(from)?;
                if self.table_exists(to)? {
                    return Err(fail(format!("there is already a table named {}", to)));
                }
                self.schema.remove(table_key(from))?;
                def.name = to.clone();
                for existing in &def.indexes {
                    self.schema.insert(index_key(&existing.name), to.as_bytes())?;
                }
                self.save_table(&def)?;
            }
            Operation::AddColumn { table, column } => {
                let mut def = require(table)?;
                def.add_column(column.clone()).map_err(fail)?;
                self.save_table(&def)?;
            }
            Operation::DropColumn { table, column } => {
                let mut def = require(table)?;
                def.drop_column(column).map_err(fail)?;
                self.save_table(&def)?;
            }
            Operation::RenameColumn { table, from, to } => {
                let mut def = require(table)?;
                def.rename_column(from, to).map_err(fail)?;
                self.save_table(&def)?;
            }
            Operation::CreateIndex {
                name,
                table,
                columns,
                unique,
            } => {
                if self.index_exists(name)? {
                    return Err(fail(format!("index {} already exists", name)));
                }
                let mut def = require(table)?;
                def.create_index(IndexDef {
                    name: name.clone(),
                    columns: columns.clone(),
                    unique: *unique,
                })
                .map_err(fail)?;
                self.save_table(&def)?;
                self.schema.insert(index_key(name), table.as_bytes())?;
            }
            Operation::DropIndex { name, table } => {
                let mut def = require(table)?;
                if !def.drop_index(name) {
                    return Err(fail(format!("no such index: {}", name)));
                }
                self.save_table(&def)?;
                self.schema.remove(index_key(name))?;
            }
            Operation::Insert { table, values } => {
                let mut def = require(table)?;
                def.insert_row(values).map_err(fail)?;
                self.save_table(&def)?;
            }
            Operation::Sql { .. } => {
                return Err(fail("raw sql is not supported by the sled store".to_string()));
            }
        }
        Ok(())
    }
}
