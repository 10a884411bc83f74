//! LIFO ledger of host-resource release actions.
//!
//! Every acquisition that must be undone (nbd attach, mount, swapon) pushes
//! its inverse command immediately after the acquisition succeeds. One
//! `release_all` call unwinds everything in reverse insertion order.

use log::warn;

use crate::process::{Cmd, Runner};

/// One stored release command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupAction {
    argv: Vec<String>,
}

impl CleanupAction {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
        }
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }
}

/// Ordered stack of [`CleanupAction`]s owned by a single pipeline run.
#[derive(Debug, Default)]
pub struct ResourceLedger {
    actions: Vec<CleanupAction>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: CleanupAction) {
        self.actions.push(action);
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Unwind the ledger: run every action in reverse insertion order.
    ///
    /// Consumes the ledger, so a second unwind of the same acquisitions is
    /// unrepresentable. Each action runs tolerantly; a failing release is
    /// logged and skipped so it cannot prevent the remaining releases.
    pub fn release_all(self, runner: &dyn Runner) {
        for action in self.actions.into_iter().rev() {
            let cmd = Cmd::from_argv(action.argv().to_vec());
            match runner.run_tolerant(&cmd) {
                Ok(0) => {}
                Ok(code) => warn!(
                    "cleanup command `{}` exited with code {code}",
                    action.argv().join(" ")
                ),
                Err(err) => warn!(
                    "cleanup command `{}` failed: {err:#}",
                    action.argv().join(" ")
                ),
            }
        }
    }
}
