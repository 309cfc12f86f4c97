//! Change-log document loading.
//!
//! Documents are YAML or JSON with the same structure:
//!
//! ```yaml
//! changelog:
//!   - changeset:
//!       id: "1"
//!       author: alice
//!       changes:
//!         - create_table:
//!             table: person
//!             columns:
//!               - { name: id, type: integer, primary_key: true }
//!   - include:
//!       file: 002-people.yaml
//! ```

use super::changeset::{ChangeSet, ChangeSetId};
use super::checksum::Checksum;
use super::error::ParseError;
use super::operation::Operation;
use super::precondition::Preconditions;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Document encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    /// YAML (`.yaml`, `.yml`).
    Yaml,
    /// JSON (`.json`).
    Json,
}

impl DocumentFormat {
    /// Pick the format from a path's extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "yaml" | "yml" => Some(DocumentFormat::Yaml),
            "json" => Some(DocumentFormat::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Document {
    changelog: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
enum Entry {
    Changeset(ChangeSetDef),
    Include(IncludeDef),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct IncludeDef {
    file: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ChangeSetDef {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    author: String,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    contexts: Vec<String>,
    #[serde(default)]
    run_on_change: bool,
    #[serde(default)]
    valid_checksums: Vec<String>,
    #[serde(default)]
    preconditions: Option<Preconditions>,
    changes: Vec<Operation>,
}

/// An ordered, fully resolved change-log.
#[derive(Debug, Clone, Default)]
pub struct ChangeLog {
    source: PathBuf,
    change_sets: Vec<ChangeSet>,
}

impl ChangeLog {
    /// Build a change-log from already constructed change-sets.
    pub fn from_change_sets(
        source: impl Into<PathBuf>,
        change_sets: Vec<ChangeSet>,
    ) -> Result<Self, ParseError> {
        let source = source.into();
        let mut seen = HashSet::new();
        for change_set in &change_sets {
            if !seen.insert(change_set.id.clone()) {
                return Err(ParseError::DuplicateChangeSet {
                    id: change_set.id.clone(),
                    path: source.clone(),
                });
            }
        }
        Ok(Self {
            source,
            change_sets,
        })
    }

    /// Root document path.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Change-sets in document order.
    pub fn change_sets(&self) -> &[ChangeSet] {
        &self.change_sets
    }

    /// Iterate change-sets in document order.
    pub fn iter(&self) -> std::slice::Iter<'_, ChangeSet> {
        self.change_sets.iter()
    }

    /// Look up a change-set by identity.
    pub fn get(&self, id: &ChangeSetId) -> Option<&ChangeSet> {
        self.change_sets.iter().find(|cs| &cs.id == id)
    }

    /// Number of change-sets.
    pub fn len(&self) -> usize {
        self.change_sets.len()
    }

    /// Whether the change-log is empty.
    pub fn is_empty(&self) -> bool {
        self.change_sets.is_empty()
    }
}

impl<'a> IntoIterator for &'a ChangeLog {
    type Item = &'a ChangeSet;
    type IntoIter = std::slice::Iter<'a, ChangeSet>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Loads change-log documents, following includes depth-first.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChangeLogLoader;

struct LoadState {
    change_sets: Vec<ChangeSet>,
    seen: HashSet<ChangeSetId>,
    stack: Vec<PathBuf>,
}

impl ChangeLogLoader {
    /// Create a loader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a change-log from a file.
    pub fn load(&self, path: &Path) -> Result<ChangeLog, ParseError> {
        let mut state = LoadState {
            change_sets: Vec::new(),
            seen: HashSet::new(),
            stack: Vec::new(),
        };
        self.load_file(path, &mut state)?;
        debug!(
            source = %path.display(),
            change_sets = state.change_sets.len(),
            "change-log loaded"
        );
        Ok(ChangeLog {
            source: path.to_path_buf(),
            change_sets: state.change_sets,
        })
    }

    /// Parse an in-memory document. `source` names the document in errors
    /// and anchors relative include paths.
    pub fn parse_str(
        &self,
        text: &str,
        format: DocumentFormat,
        source: &Path,
    ) -> Result<ChangeLog, ParseError> {
        let mut state = LoadState {
            change_sets: Vec::new(),
            seen: HashSet::new(),
            stack: vec![normalize(source)],
        };
        self.parse_document(text, format, source, &mut state)?;
        Ok(ChangeLog {
            source: source.to_path_buf(),
            change_sets: state.change_sets,
        })
    }

    fn load_file(&self, path: &Path, state: &mut LoadState) -> Result<(), ParseError> {
        let format = DocumentFormat::from_path(path).ok_or_else(|| ParseError::UnsupportedFormat {
            path: path.to_path_buf(),
        })?;

        let key = normalize(path);
        if state.stack.contains(&key) {
            return Err(ParseError::IncludeCycle {
                path: path.to_path_buf(),
            });
        }

        let text = std::fs::read_to_string(path).map_err(|source| ParseError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        state.stack.push(key);
        let result = self.parse_document(&text, format, path, state);
        state.stack.pop();
        result
    }

    fn parse_document(
        &self,
        text: &str,
        format: DocumentFormat,
        path: &Path,
        state: &mut LoadState,
    ) -> Result<(), ParseError> {
        // YAML goes through a JSON value so both formats share one decoder
        // and produce identical checksums.
        let value: serde_json::Value = match format {
            DocumentFormat::Yaml => {
                serde_yaml::from_str(text).map_err(|source| ParseError::Yaml {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            DocumentFormat::Json => {
                serde_json::from_str(text).map_err(|source| ParseError::Document {
                    path: path.to_path_buf(),
                    source,
                })?
            }
        };

        let document: Document =
            serde_json::from_value(value).map_err(|source| ParseError::Document {
                path: path.to_path_buf(),
                source,
            })?;

        for entry in document.changelog {
            match entry {
                Entry::Changeset(def) => {
                    let change_set = build_change_set(def, path)?;
                    if !state.seen.insert(change_set.id.clone()) {
                        return Err(ParseError::DuplicateChangeSet {
                            id: change_set.id,
                            path: path.to_path_buf(),
                        });
                    }
                    state.change_sets.push(change_set);
                }
                Entry::Include(include) => {
                    let target = match path.parent() {
                        Some(dir) if include.file.is_relative() => dir.join(&include.file),
                        _ => include.file.clone(),
                    };
                    debug!(from = %path.display(), include = %target.display(), "following include");
                    self.load_file(&target, state)?;
                }
            }
        }

        Ok(())
    }
}

fn build_change_set(mut def: ChangeSetDef, path: &Path) -> Result<ChangeSet, ParseError> {
    def.changes.iter_mut().for_each(Operation::normalize);

    let invalid = |message: String| ParseError::InvalidChangeSet {
        id: def.id.clone(),
        path: path.to_path_buf(),
        message,
    };

    if def.id.trim().is_empty() {
        return Err(invalid("id must not be empty".to_string()));
    }
    if def.author.trim().is_empty() {
        return Err(invalid("author must not be empty".to_string()));
    }
    if def.changes.is_empty() {
        return Err(invalid("change-set has no changes".to_string()));
    }
    for (index, operation) in def.changes.iter().enumerate() {
        operation
            .validate()
            .map_err(|message| invalid(format!("change {}: {}", index, message)))?;
    }

    let checksum = Checksum::compute(&def.changes)?;

    Ok(ChangeSet {
        id: ChangeSetId::new(def.author, def.id),
        comment: def.comment,
        contexts: def.contexts,
        run_on_change: def.run_on_change,
        valid_checksums: def
            .valid_checksums
            .into_iter()
            .map(Checksum::from_recorded)
            .collect(),
        preconditions: def.preconditions,
        operations: def.changes,
        checksum,
        source: path.to_path_buf(),
    })
}

/// Accept `id: 12` as well as `id: "12"`.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string or number id, found {}",
            other
        ))),
    }
}

fn normalize(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
