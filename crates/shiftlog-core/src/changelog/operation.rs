//! Typed schema operations carried by a change-set.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

/// Column data types understood by every target store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    /// 64-bit signed integer.
    Integer,
    /// 64-bit floating point.
    Real,
    /// UTF-8 text.
    Text,
    /// Boolean (stored as 0/1 where the store has no native boolean).
    Boolean,
    /// Binary data.
    Blob,
    /// Timestamp text (RFC 3339).
    Timestamp,
}

impl ColumnType {
    /// SQL type name used in DDL.
    pub fn sql_name(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Blob => "BLOB",
            ColumnType::Timestamp => "TIMESTAMP",
        }
    }

    /// Check whether a JSON value can be stored in a column of this type.
    ///
    /// `null` is accepted by every type; nullability is checked separately.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (ColumnType::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (ColumnType::Real, Value::Number(_)) => true,
            (ColumnType::Text | ColumnType::Timestamp, Value::String(_)) => true,
            (ColumnType::Boolean, Value::Bool(_)) => true,
            (ColumnType::Blob, Value::String(_) | Value::Array(_)) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.sql_name())
    }
}

fn default_true() -> bool {
    true
}

/// A column definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Column data type.
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    /// Whether the column accepts null.
    #[serde(default = "default_true")]
    pub nullable: bool,
    /// Whether the column is (part of) the primary key.
    #[serde(default)]
    pub primary_key: bool,
    /// Whether values must be unique.
    #[serde(default)]
    pub unique: bool,
    /// Default value for rows that omit the column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ColumnDef {
    /// Create a nullable column.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            primary_key: false,
            unique: false,
            default: None,
        }
    }

    /// Mark the column as the primary key (implies not null).
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    /// Mark the column as not null.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Mark the column as unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Set the default value.
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Primary-key columns are never nullable, however they were declared.
    fn normalize(&mut self) {
        if self.primary_key {
            self.nullable = false;
        }
    }

    fn validate(&self) -> Result<(), String> {
        check_name("column", &self.name)?;
        if let Some(default) = &self.default {
            if matches!(default, Value::Array(_) | Value::Object(_)) {
                return Err(format!(
                    "default for column '{}' must be a scalar value",
                    self.name
                ));
            }
            if !self.column_type.accepts(default) {
                return Err(format!(
                    "default for column '{}' does not match type {}",
                    self.name, self.column_type
                ));
            }
        }
        Ok(())
    }
}

/// A single schema or data action within a change-set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Operation {
    /// Create a new table.
    CreateTable {
        /// Table name.
        table: String,
        /// Column definitions in order.
        columns: Vec<ColumnDef>,
    },
    /// Drop a table and its data.
    DropTable {
        /// Table name.
        table: String,
    },
    /// Rename a table.
    RenameTable {
        /// Current name.
        from: String,
        /// New name.
        to: String,
    },
    /// Add a column to an existing table.
    AddColumn {
        /// Table name.
        table: String,
        /// Column to add.
        column: ColumnDef,
    },
    /// Drop a column.
    DropColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },
    /// Rename a column.
    RenameColumn {
        /// Table name.
        table: String,
        /// Current column name.
        from: String,
        /// New column name.
        to: String,
    },
    /// Create an index over one or more columns.
    CreateIndex {
        /// Index name.
        name: String,
        /// Indexed table.
        table: String,
        /// Indexed columns in order.
        columns: Vec<String>,
        /// Whether the index enforces uniqueness.
        #[serde(default)]
        unique: bool,
    },
    /// Drop an index.
    DropIndex {
        /// Index name.
        name: String,
        /// Table the index belongs to.
        table: String,
    },
    /// Insert a single row.
    Insert {
        /// Target table.
        table: String,
        /// Column values keyed by column name.
        values: BTreeMap<String, Value>,
    },
    /// Raw SQL, passed through to stores that speak SQL.
    Sql {
        /// Statement text (may contain several statements).
        statement: String,
    },
}

impl Operation {
    /// Short operation name, matching the document tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::CreateTable { .. } => "create_table",
            Operation::DropTable { .. } => "drop_table",
            Operation::RenameTable { .. } => "rename_table",
            Operation::AddColumn { .. } => "add_column",
            Operation::DropColumn { .. } => "drop_column",
            Operation::RenameColumn { .. } => "rename_column",
            Operation::CreateIndex { .. } => "create_index",
            Operation::DropIndex { .. } => "drop_index",
            Operation::Insert { .. } => "insert",
            Operation::Sql { .. } => "sql",
        }
    }

    /// One-line human-readable summary.
    pub fn describe(&self) -> String {
        match self {
            Operation::CreateTable { table, columns } => {
                format!("create table {} ({} columns)", table, columns.len())
            }
            Operation::DropTable { table } => format!("drop table {}", table),
            Operation::RenameTable { from, to } => format!("rename table {} to {}", from, to),
            Operation::AddColumn { table, column } => {
                format!("add column {}.{} {}", table, column.name, column.column_type)
            }
            Operation::DropColumn { table, column } => {
                format!("drop column {}.{}", table, column)
            }
            Operation::RenameColumn { table, from, to } => {
                format!("rename column {}.{} to {}", table, from, to)
            }
            Operation::CreateIndex {
                name,
                table,
                columns,
                unique,
            } => format!(
                "create {}index {} on {} ({})",
                if *unique { "unique " } else { "" },
                name,
                table,
                columns.join(", ")
            ),
            Operation::DropIndex { name, table } => format!("drop index {} on {}", name, table),
            Operation::Insert { table, values } => {
                format!("insert into {} ({} values)", table, values.len())
            }
            Operation::Sql { statement } => {
                let first_line = statement.lines().next().unwrap_or_default().trim();
                format!("sql: {}", first_line)
            }
        }
    }

    /// Bring column definitions to canonical form. Runs before the
    /// checksum is computed, so equivalent declarations hash alike.
    pub fn normalize(&mut self) {
        match self {
            Operation::CreateTable { columns, .. } => {
                columns.iter_mut().for_each(ColumnDef::normalize);
            }
            Operation::AddColumn { column, .. } => column.normalize(),
            _ => {}
        }
    }

    /// Check structural validity independent of any store.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Operation::CreateTable { table, columns } => {
                check_name("table", table)?;
                if columns.is_empty() {
                    return Err(format!("create_table {} has no columns", table));
                }
                let mut seen = HashSet::new();
                for column in columns {
                    column.validate()?;
                    if !seen.insert(column.name.as_str()) {
                        return Err(format!(
                            "create_table {} declares column '{}' twice",
                            table, column.name
                        ));
                    }
                }
                Ok(())
            }
            Operation::DropTable { table } => check_name("table", table),
            Operation::RenameTable { from, to } => {
                check_name("table", from)?;
                check_name("table", to)?;
                check_distinct(from, to)
            }
            Operation::AddColumn { table, column } => {
                check_name("table", table)?;
                column.validate()?;
                if column.primary_key {
                    return Err(format!(
                        "add_column {}.{} cannot add a primary key column",
                        table, column.name
                    ));
                }
                if !column.nullable && column.default.is_none() {
                    return Err(format!(
                        "add_column {}.{} is NOT NULL and needs a default",
                        table, column.name
                    ));
                }
                Ok(())
            }
            Operation::DropColumn { table, column } => {
                check_name("table", table)?;
                check_name("column", column)
            }
            Operation::RenameColumn { table, from, to } => {
                check_name("table", table)?;
                check_name("column", from)?;
                check_name("column", to)?;
                check_distinct(from, to)
            }
            Operation::CreateIndex {
                name,
                table,
                columns,
                ..
            } => {
                check_name("index", name)?;
                check_name("table", table)?;
                if columns.is_empty() {
                    return Err(format!("create_index {} has no columns", name));
                }
                for column in columns {
                    check_name("column", column)?;
                }
                Ok(())
            }
            Operation::DropIndex { name, table } => {
                check_name("index", name)?;
                check_name("table", table)
            }
            Operation::Insert { table, values } => {
                check_name("table", table)?;
                if values.is_empty() {
                    return Err(format!("insert into {} has no values", table));
                }
                for column in values.keys() {
                    check_name("column", column)?;
                }
                Ok(())
            }
            Operation::Sql { statement } => {
                if statement.trim().is_empty() {
                    Err("sql statement is empty".to_string())
                } else {
                    Ok(())
                }
            }
        }
    }
}

fn check_name(what: &str, name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err(format!("{} name must not be empty", what));
    }
    if name.contains('\0') {
        return Err(format!("{} name '{}' contains a NUL byte", what, name));
    }
    Ok(())
}

fn check_distinct(from: &str, to: &str) -> Result<(), String> {
    if from == to {
        Err(format!("cannot rename '{}' to itself", from))
    } else {
        Ok(())
    }
}
