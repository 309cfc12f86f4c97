//! Runner configuration.

use std::collections::BTreeSet;

/// Configuration for a [`ChangeSetRunner`](super::ChangeSetRunner).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Active contexts. Empty selects every change-set.
    pub contexts: BTreeSet<String>,
    /// Classify and report without touching the store.
    pub dry_run: bool,
    /// Name written into the store lock while a run is in progress.
    pub lock_owner: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            contexts: BTreeSet::new(),
            dry_run: false,
            lock_owner: default_lock_owner(),
        }
    }
}

impl RunnerConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Activate a context.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.contexts.insert(context.into());
        self
    }

    /// Activate several contexts.
    pub fn with_contexts<I, C>(mut self, contexts: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<String>,
    {
        self.contexts.extend(contexts.into_iter().map(Into::into));
        self
    }

    /// Enable or disable dry-run mode.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Set the lock owner name.
    pub fn with_lock_owner(mut self, owner: impl Into<String>) -> Self {
        self.lock_owner = owner.into();
        self
    }
}

/// `shiftlog@<pid>`.
fn default_lock_owner() -> String {
    format!("shiftlog@{}", std::process::id())
}
