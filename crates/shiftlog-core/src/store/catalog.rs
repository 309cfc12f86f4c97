//! Table catalog for the sled store.
//!
//! Each table is kept as a single serialized [`TableDef`] value holding its
//! columns, indexes and rows, so a change-set touches a bounded set of keys
//! inside one sled transaction.

use crate::changelog::ColumnDef;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A stored row, keyed by column name.
pub type Row = BTreeMap<String, Value>;

/// An index definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDef {
    /// Index name (unique within the store).
    pub name: String,
    /// Indexed columns.
    pub columns: Vec<String>,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
}

/// A table definition with its data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    /// Table name.
    pub name: String,
    /// Columns in declaration order.
    pub columns: Vec<ColumnDef>,
    /// Secondary indexes.
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
    /// Rows in insertion order.
    #[serde(default)]
    pub rows: Vec<Row>,
}

impl TableDef {
    /// Create an empty table.
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: name.into(),
            columns,
            indexes: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Get a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Get an index by name.
    pub fn index(&self, name: &str) -> Option<&IndexDef> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// Names of the primary key columns.
    pub fn primary_key(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Add a column, filling existing rows with its default.
    pub fn add_column(&mut self, column: ColumnDef) -> Result<(), String> {
        if self.column(&column.name).is_some() {
            return Err(format!(
                "column '{}' already exists on table '{}'",
                column.name, self.name
            ));
        }
        if column.primary_key {
            return Err(format!(
                "cannot add primary key column '{}' to existing table '{}'",
                column.name, self.name
            ));
        }
        let fill = column.default.clone().unwrap_or(Value::Null);
        if !self.rows.is_empty() && !column.nullable && fill.is_null() {
            return Err(format!(
                "cannot add NOT NULL column '{}' without a default to non-empty table '{}'",
                column.name, self.name
            ));
        }
        if column.unique && self.rows.len() > 1 && !fill.is_null() {
            return Err(format!(
                "cannot add UNIQUE column '{}' with a shared default to table '{}'",
                column.name, self.name
            ));
        }

        for row in &mut self.rows {
            row.insert(column.name.clone(), fill.clone());
        }
        self.columns.push(column);
        Ok(())
    }

    /// Drop a column and its data.
    pub fn drop_column(&mut self, name: &str) -> Result<(), String> {
        let position = self
            .columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| format!("no such column: {}.{}", self.name, name))?;
        if self.columns.len() == 1 {
            return Err(format!(
                "cannot drop '{}', the only column of table '{}'",
                name, self.name
            ));
        }
        if self.columns[position].primary_key {
            return Err(format!("cannot drop primary key column '{}'", name));
        }
        if self.columns[position].unique {
            return Err(format!("cannot drop unique column '{}'", name));
        }
        if let Some(index) = self.indexes.iter().find(|i| i.columns.iter().any(|c| c == name)) {
            return Err(format!(
                "cannot drop column '{}': used by index '{}'",
                name, index.name
            ));
        }

        self.columns.remove(position);
        for row in &mut self.rows {
            row.remove(name);
        }
        Ok(())
    }

    /// Rename a column in the definition, its indexes and its rows.
    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<(), String> {
        if self.column(to).is_some() {
            return Err(format!(
                "column '{}' already exists on table '{}'",
                to, self.name
            ));
        }
        let column = self
            .columns
            .iter_mut()
            .find(|c| c.name == from)
            .ok_or_else(|| format!("no such column: {}.{}", self.name, from))?;
        column.name = to.to_string();

        for index in &mut self.indexes {
            for column in &mut index.columns {
                if column == from {
                    *column = to.to_string();
                }
            }
        }
        for row in &mut self.rows {
            if let Some(value) = row.remove(from) {
                row.insert(to.to_string(), value);
            }
        }
        Ok(())
    }

    /// Add an index, checking existing rows when it is unique.
    pub fn create_index(&mut self, index: IndexDef) -> Result<(), String> {
        for column in &index.columns {
            if self.column(column).is_none() {
                return Err(format!("no such column: {}.{}", self.name, column));
            }
        }
        if index.unique {
            let mut seen = Vec::with_capacity(self.rows.len());
            for row in &self.rows {
                if let Some(key) = key_of(row, &index.columns) {
                    if seen.contains(&key) {
                        return Err(format!(
                            "cannot create unique index '{}': duplicate values in {}",
                            index.name,
                            index.columns.join(", ")
                        ));
                    }
                    seen.push(key);
                }
            }
        }
        self.indexes.push(index);
        Ok(())
    }

    /// Remove an index. Returns whether it existed.
    pub fn drop_index(&mut self, name: &str) -> bool {
        let before = self.indexes.len();
        self.indexes.retain(|i| i.name != name);
        self.indexes.len() != before
    }

    /// Insert a row after type, nullability and uniqueness checks.
    pub fn insert_row(&mut self, values: &Row) -> Result<(), String> {
        for name in values.keys() {
            if self.column(name).is_none() {
                return Err(format!("no such column: {}.{}", self.name, name));
            }
        }

        let mut row = Row::new();
        for column in &self.columns {
            let value = values
                .get(&column.name)
                .cloned()
                .or_else(|| column.default.clone())
                .unwrap_or(Value::Null);
            if value.is_null() && !column.nullable {
                return Err(format!(
                    "NOT NULL constraint failed: {}.{}",
                    self.name, column.name
                ));
            }
            if !column.column_type.accepts(&value) {
                return Err(format!(
                    "value {} does not match type {} of {}.{}",
                    value, column.column_type, self.name, column.name
                ));
            }
            row.insert(column.name.clone(), value);
        }

        for columns in self.unique_keys() {
            if let Some(key) = key_of(&row, &columns) {
                if self.rows.iter().any(|r| key_of(r, &columns).as_ref() == Some(&key)) {
                    return Err(format!(
                        "UNIQUE constraint failed: {}.{}",
                        self.name,
                        columns.join(", ")
                    ));
                }
            }
        }

        self.rows.push(row);
        Ok(())
    }

    /// Column sets that must hold distinct values.
    fn unique_keys(&self) -> Vec<Vec<String>> {
        let mut keys = Vec::new();
        let primary: Vec<String> = self.primary_key().iter().map(|c| c.to_string()).collect();
        if !primary.is_empty() {
            keys.push(primary);
        }
        keys.extend(
            self.columns
                .iter()
                .filter(|c| c.unique)
                .map(|c| vec![c.name.clone()]),
        );
        keys.extend(
            self.indexes
                .iter()
                .filter(|i| i.unique)
                .map(|i| i.columns.clone()),
        );
        keys
    }
}

/// Values of `columns` in `row`; `None` when any is null, since nulls never
/// collide.
fn key_of(row: &Row, columns: &[String]) -> Option<Vec<Value>> {
    let mut key = Vec::with_capacity(columns.len());
    for column in columns {
        match row.get(column) {
            Some(value) if !value.is_null() => key.push(value.clone()),
            _ => return None,
        }
    }
    Some(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changelog::ColumnType;
    use serde_json::json;

    fn person() -> TableDef {
        TableDef::new(
            "person",
            vec![
                ColumnDef::new("id", ColumnType::Integer).primary_key(),
                ColumnDef::new("name", ColumnType::Text),
            ],
        )
    }

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_insert_fills_defaults_and_nulls() {
        let mut table = person();
        table
            .add_column(ColumnDef::new("active", ColumnType::Boolean).with_default(true))
            .unwrap();
        table.insert_row(&row(&[("id", json!(1))])).unwrap();

        assert_eq!(table.rows[0]["active"], json!(true));
        assert_eq!(table.rows[0]["name"], Value::Null);
    }

    #[test]
    fn test_insert_rejects_bad_rows() {
        let mut table = person();
        table
            .insert_row(&row(&[("id", json!(1)), ("name", json!("Ada"))]))
            .unwrap();

        let err = table.insert_row(&row(&[("id", json!(1))])).unwrap_err();
        assert!(err.contains("UNIQUE"));

        let err = table.insert_row(&row(&[("name", json!("x"))])).unwrap_err();
        assert!(err.contains("NOT NULL"));

        let err = table
            .insert_row(&row(&[("id", json!("two"))]))
            .unwrap_err();
        assert!(err.contains("does not match type"));

        let err = table
            .insert_row(&row(&[("id", json!(3)), ("email", json!("a@b"))]))
            .unwrap_err();
        assert!(err.contains("no such column"));
        assert_eq!(table.rows.len(), 1);
    }

    #[test]
    fn test_add_not_null_column_needs_default_when_rows_exist() {
        let mut table = person();
        table.insert_row(&row(&[("id", json!(1))])).unwrap();

        let err = table
            .add_column(ColumnDef::new("email", ColumnType::Text).not_null())
            .unwrap_err();
        assert!(err.contains("without a default"));

        table
            .add_column(
                ColumnDef::new("email", ColumnType::Text)
                    .not_null()
                    .with_default(""),
            )
            .unwrap();
        assert_eq!(table.rows[0]["email"], json!(""));
        assert!(table.add_column(ColumnDef::new("email", ColumnType::Text)).is_err());
    }

    #[test]
    fn test_rename_column_updates_rows_and_indexes() {
        let mut table = person();
        table
            .create_index(IndexDef {
                name: "idx_person_name".to_string(),
                columns: vec!["name".to_string()],
                unique: false,
            })
            .unwrap();
        table
            .insert_row(&row(&[("id", json!(1)), ("name", json!("Ada"))]))
            .unwrap();

        table.rename_column("name", "full_name").unwrap();
        assert!(table.column("name").is_none());
        assert_eq!(table.rows[0]["full_name"], json!("Ada"));
        assert_eq!(table.indexes[0].columns, vec!["full_name".to_string()]);
        assert!(table.rename_column("missing", "x").is_err());
    }

    #[test]
    fn test_drop_column_rules() {
        let mut table = person();
        table
            .create_index(IndexDef {
                name: "idx_person_name".to_string(),
                columns: vec!["name".to_string()],
                unique: false,
            })
            .unwrap();

        assert!(table.drop_column("name").unwrap_err().contains("idx_person_name"));
        assert!(table.drop_column("id").is_err());
        assert!(table.drop_index("idx_person_name"));
        assert!(!table.drop_index("idx_person_name"));
        table.drop_column("name").unwrap();
        assert_eq!(table.columns.len(), 1);

        table
            .add_column(ColumnDef::new("email", ColumnType::Text).unique())
            .unwrap();
        assert!(table.drop_column("email").unwrap_err().contains("unique"));
    }

    #[test]
    fn test_unique_index_rejects_existing_duplicates() {
        let mut table = person();
        table
            .insert_row(&row(&[("id", json!(1)), ("name", json!("Ada"))]))
            .unwrap();
        table
            .insert_row(&row(&[("id", json!(2)), ("name", json!("Ada"))]))
            .unwrap();

        let err = table
            .create_index(IndexDef {
                name: "ux_person_name".to_string(),
                columns: vec!["name".to_string()],
                unique: true,
            })
            .unwrap_err();
        assert!(err.contains("duplicate"));
        assert!(table.indexes.is_empty());
    }
}
