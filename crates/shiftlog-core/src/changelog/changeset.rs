//! Change-set identity and definition.

use super::checksum::Checksum;
use super::operation::Operation;
use super::precondition::Preconditions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Identity of a change-set: `(author, id)`, unique together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChangeSetId {
    /// Author of the change-set.
    pub author: String,
    /// Author-scoped identifier.
    pub id: String,
}

impl ChangeSetId {
    /// Create a new change-set identifier.
    pub fn new(author: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for ChangeSetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}", self.id, self.author)
    }
}

/// A parsed change-set, ready to run.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet {
    /// Identity.
    pub id: ChangeSetId,
    /// Free-form description.
    pub comment: Option<String>,
    /// Contexts this change-set is restricted to. Empty means always.
    pub contexts: Vec<String>,
    /// Re-run instead of raising a conflict when the checksum changes.
    pub run_on_change: bool,
    /// Earlier checksums that are still accepted as "already applied".
    pub valid_checksums: Vec<Checksum>,
    /// Guard evaluated before the operations run.
    pub preconditions: Option<Preconditions>,
    /// Operations, applied in order.
    pub operations: Vec<Operation>,
    /// Checksum of `operations`.
    pub checksum: Checksum,
    /// Document the change-set was loaded from.
    pub source: PathBuf,
}

impl ChangeSet {
    /// Create a change-set from its operations, computing the checksum.
    pub fn new(
        author: impl Into<String>,
        id: impl Into<String>,
        mut operations: Vec<Operation>,
    ) -> Result<Self, serde_json::Error> {
        operations.iter_mut().for_each(Operation::normalize);
        let checksum = Checksum::compute(&operations)?;
        Ok(Self {
            id: ChangeSetId::new(author, id),
            comment: None,
            contexts: Vec::new(),
            run_on_change: false,
            valid_checksums: Vec::new(),
            preconditions: None,
            operations,
            checksum,
            source: PathBuf::new(),
        })
    }

    /// Set the comment.
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Restrict the change-set to a context.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.contexts.push(context.into());
        self
    }

    /// Re-run when the definition changes.
    pub fn with_run_on_change(mut self, run_on_change: bool) -> Self {
        self.run_on_change = run_on_change;
        self
    }

    /// Accept an earlier checksum.
    pub fn with_valid_checksum(mut self, checksum: Checksum) -> Self {
        self.valid_checksums.push(checksum);
        self
    }

    /// Attach preconditions.
    pub fn with_preconditions(mut self, preconditions: Preconditions) -> Self {
        self.preconditions = Some(preconditions);
        self
    }

    /// Record the source document.
    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = source.into();
        self
    }

    /// Whether the change-set runs under the given active contexts.
    ///
    /// No active contexts selects everything; a change-set without
    /// contexts runs under any selection.
    pub fn matches_contexts(&self, active: &BTreeSet<String>) -> bool {
        if active.is_empty() || self.contexts.is_empty() {
            return true;
        }
        self.contexts.iter().any(|c| active.contains(c))
    }

    /// Whether a recorded checksum still counts as this definition.
    pub fn accepts_checksum(&self, recorded: &Checksum) -> bool {
        *recorded == self.checksum || self.valid_checksums.contains(recorded)
    }
}
