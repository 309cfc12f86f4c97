//! Preconditions guarding a change-set.

use serde::{Deserialize, Serialize};

/// What to do when a precondition does not hold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnFail {
    /// Stop the run with an error.
    #[default]
    Halt,
    /// Skip the change-set for this run; it stays pending.
    Continue,
    /// Record the change-set as applied without running it.
    MarkRan,
}

/// A single condition over store state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Precondition {
    /// The table exists.
    TableExists {
        /// Table name.
        table: String,
    },
    /// The column exists on the table.
    ColumnExists {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },
    /// Negation.
    Not(Box<Precondition>),
    /// At least one of the conditions holds.
    Any(Vec<Precondition>),
}

/// Read-only view of store structure, used to evaluate preconditions.
pub trait SchemaInspector {
    /// Error produced by the inspector.
    type Error;

    /// Check whether a table exists.
    fn table_exists(&self, table: &str) -> Result<bool, Self::Error>;

    /// Check whether a column exists on a table.
    fn column_exists(&self, table: &str, column: &str) -> Result<bool, Self::Error>;
}

impl Precondition {
    /// Evaluate against the inspector.
    pub fn evaluate<I: SchemaInspector>(&self, inspector: &I) -> Result<bool, I::Error> {
        match self {
            Precondition::TableExists { table } => inspector.table_exists(table),
            Precondition::ColumnExists { table, column } => {
                inspector.column_exists(table, column)
            }
            Precondition::Not(inner) => Ok(!inner.evaluate(inspector)?),
            Precondition::Any(conditions) => {
                for condition in conditions {
                    if condition.evaluate(inspector)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    /// Human-readable form, used in reports.
    pub fn describe(&self) -> String {
        match self {
            Precondition::TableExists { table } => format!("table_exists({})", table),
            Precondition::ColumnExists { table, column } => {
                format!("column_exists({}.{})", table, column)
            }
            Precondition::Not(inner) => format!("not({})", inner.describe()),
            Precondition::Any(conditions) => format!(
                "any({})",
                conditions
                    .iter()
                    .map(Precondition::describe)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }
}

/// The precondition block of a change-set. All conditions must hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Preconditions {
    /// Policy when a condition fails.
    #[serde(default)]
    pub on_fail: OnFail,
    /// Conditions, evaluated in order.
    pub conditions: Vec<Precondition>,
}

impl Preconditions {
    /// Create a precondition block.
    pub fn new(on_fail: OnFail, conditions: Vec<Precondition>) -> Self {
        Self {
            on_fail,
            conditions,
        }
    }

    /// Return the first failing condition, if any.
    pub fn first_failure<I: SchemaInspector>(
        &self,
        inspector: &I,
    ) -> Result<Option<&Precondition>, I::Error> {
        for condition in &self.conditions {
            if !condition.evaluate(inspector)? {
                return Ok(Some(condition));
            }
        }
        Ok(None)
    }
}
