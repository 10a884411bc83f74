//! Typed failures surfaced by the provisioning pipeline.
//!
//! Most of the crate propagates errors with `anyhow`; these variants exist
//! for the failures callers need to distinguish. They convert into
//! `anyhow::Error` and stay downcastable through a context chain.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvisionError {
    /// An external command exited non-zero where failure was not tolerated.
    #[error("command `{}` failed with exit code {code}", argv.join(" "))]
    CommandFailed { argv: Vec<String>, code: i32 },

    /// A disk declared a filesystem the preparer cannot handle.
    #[error("unsupported filesystem '{0}', expected ext4 or swap")]
    UnsupportedFilesystem(String),

    /// The descriptor names a guest flavor with no installer.
    #[error("unsupported guest type '{0}'")]
    UnsupportedGuestFlavor(String),
}
