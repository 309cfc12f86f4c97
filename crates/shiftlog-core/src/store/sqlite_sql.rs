//! Rendering of operations as SQLite statements.

use crate::changelog::{ColumnDef, Operation};
use rusqlite::types::Value as SqlValue;
use serde_json::Value;

/// A statement plus its bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SqlStatement {
    pub sql: String,
    pub params: Vec<SqlValue>,
    /// Raw SQL may hold several statements and goes through `execute_batch`.
    pub batch: bool,
}

impl SqlStatement {
    fn plain(sql: String) -> Self {
        Self {
            sql,
            params: Vec::new(),
            batch: false,
        }
    }
}

/// Quote an identifier.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Render a JSON scalar as an SQL literal (used for column defaults).
fn literal(value: &Value) -> Result<String, String> {
    match value {
        Value::Null => Ok("NULL".to_string()),
        Value::Bool(b) => Ok(if *b { "1" } else { "0" }.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) => Ok(quote_literal(s)),
        Value::Array(_) | Value::Object(_) => {
            Err("default values must be scalars".to_string())
        }
    }
}

/// Convert a JSON value into a bound parameter.
pub(crate) fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn column_sql(column: &ColumnDef, inline_primary_key: bool) -> Result<String, String> {
    let mut sql = format!(
        "{} {}",
        quote_ident(&column.name),
        column.column_type.sql_name()
    );
    if !column.nullable {
        sql.push_str(" NOT NULL");
    }
    if inline_primary_key && column.primary_key {
        sql.push_str(" PRIMARY KEY");
    }
    if column.unique {
        sql.push_str(" UNIQUE");
    }
    if let Some(default) = &column.default {
        sql.push_str(" DEFAULT ");
        sql.push_str(&literal(default)?);
    }
    Ok(sql)
}

/// Name of the index backing a unique column added after table creation.
pub(crate) fn unique_column_index(table: &str, column: &str) -> String {
    format!("{}_{}_unique", table, column)
}

/// Render an operation for SQLite, in execution order.
///
/// SQLite cannot add a `UNIQUE` column, so `add_column` with `unique`
/// becomes the plain column plus a unique index over it.
pub(crate) fn render(operation: &Operation) -> Result<Vec<SqlStatement>, String> {
    let statement = match operation {
        Operation::CreateTable { table, columns } => {
            let primary_keys: Vec<&ColumnDef> = columns.iter().filter(|c| c.primary_key).collect();
            let inline = primary_keys.len() == 1;
            let mut parts = Vec::with_capacity(columns.len() + 1);
            for column in columns {
                parts.push(column_sql(column, inline)?);
            }
            if primary_keys.len() > 1 {
                let names: Vec<String> = primary_keys.iter().map(|c| quote_ident(&c.name)).collect();
                parts.push(format!("PRIMARY KEY ({})", names.join(", ")));
            }
            SqlStatement::plain(format!(
                "CREATE TABLE {} ({})",
                quote_ident(table),
                parts.join(", ")
            ))
        }
        Operation::DropTable { table } => {
            SqlStatement::plain(format!("DROP TABLE {}", quote_ident(table)))
        }
        Operation::RenameTable { from, to } => SqlStatement::plain(format!(
            "ALTER TABLE {} RENAME TO {}",
            quote_ident(from),
            quote_ident(to)
        )),
        Operation::AddColumn { table, column } => {
            let plain_column = ColumnDef {
                unique: false,
                ..column.clone()
            };
            let mut statements = vec![SqlStatement::plain(format!(
                "ALTER TABLE {} ADD COLUMN {}",
                quote_ident(table),
                column_sql(&plain_column, true)?
            ))];
            if column.unique {
                statements.push(SqlStatement::plain(format!(
                    "CREATE UNIQUE INDEX {} ON {} ({})",
                    quote_ident(&unique_column_index(table, &column.name)),
                    quote_ident(table),
                    quote_ident(&column.name)
                )));
            }
            return Ok(statements);
        }
        Operation::DropColumn { table, column } => SqlStatement::plain(format!(
            "ALTER TABLE {} DROP COLUMN {}",
            quote_ident(table),
            quote_ident(column)
        )),
        Operation::RenameColumn { table, from, to } => SqlStatement::plain(format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            quote_ident(table),
            quote_ident(from),
            quote_ident(to)
        )),
        Operation::CreateIndex {
            name,
            table,
            columns,
            unique,
        } => {
            let cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
            SqlStatement::plain(format!(
                "CREATE {}INDEX {} ON {} ({})",
                if *unique { "UNIQUE " } else { "" },
                quote_ident(name),
                quote_ident(table),
                cols.join(", ")
            ))
        }
        Operation::DropIndex { name, .. } => {
            SqlStatement::plain(format!("DROP INDEX {}", quote_ident(name)))
        }
        Operation::Insert { table, values } => {
            let columns: Vec<String> = values.keys().map(|c| quote_ident(c)).collect();
            let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("?{}", i)).collect();
            SqlStatement {
                sql: format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    quote_ident(table),
                    columns.join(", "),
                    placeholders.join(", ")
                ),
                params: values.values().map(to_sql_value).collect(),
                batch: false,
            }
        }
        Operation::Sql { statement } => SqlStatement {
            sql: statement.clone(),
            params: Vec::new(),
            batch: true,
        },
    };
    Ok(vec![statement])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changelog::ColumnType;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn render_one(operation: &Operation) -> SqlStatement {
        let mut statements = render(operation).unwrap();
        assert_eq!(statements.len(), 1);
        statements.remove(0)
    }

    #[test]
    fn test_render_create_table() {
        let op = Operation::CreateTable {
            table: "person".to_string(),
            columns: vec![
                ColumnDef::new("id", ColumnType::Integer).primary_key(),
                ColumnDef::new("name", ColumnType::Text)
                    .not_null()
                    .with_default("anon"),
                ColumnDef::new("email", ColumnType::Text).unique(),
            ],
        };
        let stmt = render_one(&op);
        assert_eq!(
            stmt.sql,
            "CREATE TABLE \"person\" (\"id\" INTEGER NOT NULL PRIMARY KEY, \
             \"name\" TEXT NOT NULL DEFAULT 'anon', \"email\" TEXT UNIQUE)"
        );
    }

    #[test]
    fn test_render_composite_primary_key() {
        let op = Operation::CreateTable {
            table: "membership".to_string(),
            columns: vec![
                ColumnDef::new("group_id", ColumnType::Integer).primary_key(),
                ColumnDef::new("person_id", ColumnType::Integer).primary_key(),
            ],
        };
        let stmt = render_one(&op);
        assert!(stmt
            .sql
            .ends_with("PRIMARY KEY (\"group_id\", \"person_id\"))"));
        assert!(!stmt.sql.contains("INTEGER NOT NULL PRIMARY KEY"));
    }

    #[test]
    fn test_render_insert_binds_values() {
        let mut values = BTreeMap::new();
        values.insert("id".to_string(), json!(1));
        values.insert("active".to_string(), json!(true));
        values.insert("name".to_string(), json!("O'Brien"));
        let stmt = render_one(&Operation::Insert {
            table: "person".to_string(),
            values,
        });
        assert_eq!(
            stmt.sql,
            "INSERT INTO \"person\" (\"active\", \"id\", \"name\") VALUES (?1, ?2, ?3)"
        );
        assert_eq!(
            stmt.params,
            vec![
                SqlValue::Integer(1),
                SqlValue::Integer(1),
                SqlValue::Text("O'Brien".to_string())
            ]
        );
    }

    #[test]
    fn test_identifiers_are_quoted() {
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        let stmt = render_one(&Operation::DropTable {
            table: "order".to_string(),
        });
        assert_eq!(stmt.sql, "DROP TABLE \"order\"");
    }

    #[test]
    fn test_raw_sql_is_batched() {
        let stmt = render_one(&Operation::Sql {
            statement: "UPDATE person SET name = 'x'; DELETE FROM person;".to_string(),
        });
        assert!(stmt.batch);
    }

    #[test]
    fn test_render_add_unique_column_as_index() {
        let statements = render(&Operation::AddColumn {
            table: "person".to_string(),
            column: ColumnDef::new("email", ColumnType::Text).unique(),
        })
        .unwrap();
        let sql: Vec<&str> = statements.iter().map(|s| s.sql.as_str()).collect();
        assert_eq!(
            sql,
            vec![
                "ALTER TABLE \"person\" ADD COLUMN \"email\" TEXT",
                "CREATE UNIQUE INDEX \"person_email_unique\" ON \"person\" (\"email\")",
            ]
        );
    }

    #[test]
    fn test_render_add_plain_column() {
        let stmt = render_one(&Operation::AddColumn {
            table: "person".to_string(),
            column: ColumnDef::new("age", ColumnType::Integer).not_null().with_default(0),
        });
        assert_eq!(
            stmt.sql,
            "ALTER TABLE \"person\" ADD COLUMN \"age\" INTEGER NOT NULL DEFAULT 0"
        );
    }
}
