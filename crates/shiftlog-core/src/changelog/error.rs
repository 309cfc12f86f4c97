//! Change-log parsing errors.

use super::changeset::ChangeSetId;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading a change-log. Always fatal, and always raised
/// before any store is touched.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The document could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Document path.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// The file extension does not name a supported format.
    #[error("unsupported change-log format for {path}: expected .yaml, .yml or .json")]
    UnsupportedFormat {
        /// Document path.
        path: PathBuf,
    },

    /// The document is not valid YAML.
    #[error("invalid YAML in {path}: {source}")]
    Yaml {
        /// Document path.
        path: PathBuf,
        /// Underlying YAML error.
        source: serde_yaml::Error,
    },

    /// The document does not match the change-log structure (including
    /// unknown operation types and unknown fields).
    #[error("invalid change-log document {path}: {source}")]
    Document {
        /// Document path.
        path: PathBuf,
        /// Underlying decoding error.
        source: serde_json::Error,
    },

    /// Two change-sets share an `(author, id)` pair.
    #[error("duplicate change-set {id} in {path}")]
    DuplicateChangeSet {
        /// The repeated identifier.
        id: ChangeSetId,
        /// Document containing the second occurrence.
        path: PathBuf,
    },

    /// An include chain leads back to a document already being loaded.
    #[error("include cycle detected at {path}")]
    IncludeCycle {
        /// Document that closes the cycle.
        path: PathBuf,
    },

    /// A change-set is structurally invalid.
    #[error("invalid change-set {id} in {path}: {message}")]
    InvalidChangeSet {
        /// Identifier as written in the document.
        id: String,
        /// Document path.
        path: PathBuf,
        /// What is wrong.
        message: String,
    },

    /// The checksum could not be computed.
    #[error("failed to compute checksum: {0}")]
    Checksum(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ParseError::DuplicateChangeSet {
            id: ChangeSetId::new("alice", "7"),
            path: PathBuf::from("db/changelog.yaml"),
        };
        assert_eq!(
            err.to_string(),
            "duplicate change-set 7::alice in db/changelog.yaml"
        );
    }
}
