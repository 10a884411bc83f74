//! External command execution.
//!
//! Every privileged operation in the pipeline goes through a [`Cmd`] and a
//! [`Runner`]. Arguments are passed literally to the child process, never
//! through a shell, so descriptor-derived values (UUIDs, hostnames) cannot
//! be interpreted. Commands block without a timeout; a hung external tool
//! hangs the run.

use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use log::debug;

use crate::error::ProvisionError;

/// A command invocation: argv plus environment adjustments.
///
/// The child inherits the ambient process environment, merged with the
/// extra variables set here. A PATH override replaces the inherited PATH
/// entirely (used for chroot execution, where the target's PATH cannot be
/// trusted).
#[derive(Debug, Clone)]
pub struct Cmd {
    argv: Vec<String>,
    env: Vec<(String, String)>,
    path_override: Option<String>,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            argv: vec![program.into()],
            env: Vec::new(),
            path_override: None,
        }
    }

    /// Build a command from a complete argument vector.
    pub fn from_argv(argv: Vec<String>) -> Self {
        Self {
            argv,
            env: Vec::new(),
            path_override: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.argv.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.argv.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn arg_path(mut self, path: &Path) -> Self {
        self.argv.push(path.to_string_lossy().into_owned());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Replace the child's PATH instead of inheriting it.
    pub fn path_override(mut self, path: impl Into<String>) -> Self {
        self.path_override = Some(path.into());
        self
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn env_vars(&self) -> &[(String, String)] {
        &self.env
    }
}

/// Outcome of one command execution.
#[derive(Debug)]
pub struct RunResult {
    pub code: i32,
    /// Combined stdout and stderr text; empty unless output was captured.
    pub output: String,
}

/// Execution seam for external commands.
///
/// Production code uses [`HostRunner`]; tests substitute a recording fake to
/// assert on command sequencing without touching the host.
pub trait Runner {
    /// Execute `cmd`. With `capture` the combined output is returned and a
    /// non-zero exit is always a hard failure (a caller capturing output
    /// needs the value, silent failure is never acceptable). Without
    /// `capture`, output is discarded and a non-zero exit fails only when
    /// `fail_hard` is set.
    fn execute(&self, cmd: &Cmd, capture: bool, fail_hard: bool) -> Result<RunResult>;

    /// Run, discard output, fail on non-zero exit.
    fn run(&self, cmd: &Cmd) -> Result<()> {
        self.execute(cmd, false, true)?;
        Ok(())
    }

    /// Run, discard output, return the exit code for the caller to inspect.
    fn run_tolerant(&self, cmd: &Cmd) -> Result<i32> {
        Ok(self.execute(cmd, false, false)?.code)
    }

    /// Run and return combined stdout+stderr; non-zero exit is fatal.
    fn run_capture(&self, cmd: &Cmd) -> Result<String> {
        Ok(self.execute(cmd, true, true)?.output)
    }
}

/// Runs commands on the host via `std::process`.
pub struct HostRunner;

impl Runner for HostRunner {
    fn execute(&self, cmd: &Cmd, capture: bool, fail_hard: bool) -> Result<RunResult> {
        debug!("run command: {}", cmd.argv().join(" "));

        let (program, args) = cmd
            .argv()
            .split_first()
            .context("cannot execute an empty argument vector")?;
        let mut command = Command::new(program);
        command.args(args);
        for (key, value) in cmd.env_vars() {
            command.env(key, value);
        }
        if let Some(path) = &cmd.path_override {
            command.env("PATH", path);
        }

        if capture {
            let output = command
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output()
                .with_context(|| format!("failed to execute {program}"))?;
            let code = output.status.code().unwrap_or(-1);
            if !output.status.success() {
                return Err(ProvisionError::CommandFailed {
                    argv: cmd.argv().to_vec(),
                    code,
                }
                .into());
            }
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            Ok(RunResult { code, output: text })
        } else {
            let status = command
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .with_context(|| format!("failed to execute {program}"))?;
            let code = status.code().unwrap_or(-1);
            if fail_hard && !status.success() {
                return Err(ProvisionError::CommandFailed {
                    argv: cmd.argv().to_vec(),
                    code,
                }
                .into());
            }
            Ok(RunResult {
                code,
                output: String::new(),
            })
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_succeeds_for_zero_exit() {
        HostRunner.run(&Cmd::new("true")).unwrap();
    }

    #[test]
    fn run_fails_hard_on_nonzero_exit() {
        let err = HostRunner.run(&Cmd::new("false")).unwrap_err();
        match err.downcast_ref::<ProvisionError>() {
            Some(ProvisionError::CommandFailed { argv, code }) => {
                assert_eq!(argv, &["false"]);
                assert_eq!(*code, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn run_tolerant_reports_exit_code() {
        let code = HostRunner
            .run_tolerant(&Cmd::new("sh").args(["-c", "exit 3"]))
            .unwrap();
        assert_eq!(code, 3);
    }

    #[test]
    fn run_capture_returns_combined_output() {
        let out = HostRunner
            .run_capture(&Cmd::new("sh").args(["-c", "echo out; echo err >&2"]))
            .unwrap();
        assert!(out.contains("out"));
        assert!(out.contains("err"));
    }

    #[test]
    fn run_capture_always_fails_hard() {
        let err = HostRunner
            .run_capture(&Cmd::new("sh").args(["-c", "echo partial; exit 2"]))
            .unwrap_err();
        assert!(err.downcast_ref::<ProvisionError>().is_some());
    }

    #[test]
    fn env_and_path_override_reach_the_child() {
        let out = HostRunner
            .run_capture(
                &Cmd::new("sh")
                    .args(["-c", "echo $FORGE_TEST:$PATH"])
                    .env("FORGE_TEST", "yes")
                    .path_override("/pinned/bin"),
            )
            .unwrap();
        assert!(out.starts_with("yes:/pinned/bin"));
    }
}
