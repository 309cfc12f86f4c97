//! Change-set checksums.

use super::operation::Operation;
use serde::{Deserialize, Serialize};

/// Versioned checksum of a change-set's operations.
///
/// Format: `v1:<blake3 hex>`. Only the operation list is hashed, so
/// comments, contexts and preconditions can be edited freely.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(String);

impl Checksum {
    /// Current checksum scheme prefix.
    pub const VERSION: &'static str = "v1";

    /// Compute the checksum of an operation list.
    pub fn compute(operations: &[Operation]) -> Result<Self, serde_json::Error> {
        let canonical = serde_json::to_vec(operations)?;
        let hash = blake3::hash(&canonical);
        Ok(Self(format!("{}:{}", Self::VERSION, hash.to_hex())))
    }

    /// Wrap a checksum string read back from a ledger or document.
    pub fn from_recorded(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The checksum as text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The scheme prefix, if the checksum carries one.
    pub fn version(&self) -> Option<&str> {
        self.0.split_once(':').map(|(version, _)| version)
    }
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
