//! Command executor.
//!
//! Every native invocation is described by a [`CommandSpec`]: a program from
//! the fixed [`Binary`] set and an argument vector. Nothing is ever handed to
//! a shell, so option values (passwords, URLs, file names) are inert data.

pub mod classify;

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::tool::Binary;

#[derive(Clone)]
struct Arg {
    value: OsString,
    secret: bool,
}

/// A fully built native command.
#[derive(Clone)]
pub struct CommandSpec {
    binary: Binary,
    args: Vec<Arg>,
    success_codes: &'static [i32],
}

impl CommandSpec {
    pub fn new(binary: Binary) -> Self {
        Self {
            binary,
            args: Vec::new(),
            success_codes: &[0],
        }
    }

    pub fn arg(mut self, value: impl AsRef<OsStr>) -> Self {
        self.args.push(Arg {
            value: value.as_ref().to_owned(),
            secret: false,
        });
        self
    }

    pub fn args<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for v in values {
            self = self.arg(v);
        }
        self
    }

    /// `--flag=<path>` style argument.
    pub fn arg_with_path(self, flag: &str, path: &Path) -> Self {
        let mut value = OsString::from(flag);
        value.push(path.as_os_str());
        self.arg(value)
    }

    /// An argument that must never reach the logs.
    pub fn secret_arg(mut self, value: impl Into<OsString>) -> Self {
        self.args.push(Arg {
            value: value.into(),
            secret: true,
        });
        self
    }

    /// Exit statuses that count as success (default `[0]`).
    pub fn success_codes(mut self, codes: &'static [i32]) -> Self {
        self.success_codes = codes;
        self
    }

    pub fn binary(&self) -> Binary {
        self.binary
    }

    pub fn program(&self) -> &'static str {
        self.binary.program()
    }

    pub fn arg_values(&self) -> impl Iterator<Item = &OsStr> {
        self.args.iter().map(|a| a.value.as_os_str())
    }

    pub fn is_success(&self, code: Option<i32>) -> bool {
        code.is_some_and(|c| self.success_codes.contains(&c))
    }

    /// Value following `flag`, e.g. the directory after `--outdir`.
    pub fn value_after(&self, flag: &str) -> Option<&OsStr> {
        let mut iter = self.arg_values();
        iter.by_ref().find(|a| *a == OsStr::new(flag))?;
        iter.next()
    }

    /// Remainder of the first argument starting with `prefix`.
    pub fn value_with_prefix(&self, prefix: &str) -> Option<String> {
        self.arg_values()
            .filter_map(|a| a.to_str())
            .find_map(|a| a.strip_prefix(prefix).map(str::to_owned))
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

/// Log-safe rendering: secret arguments print as `<redacted>`.
impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())?;
        for arg in &self.args {
            if arg.secret {
                f.write_str(" <redacted>")?;
            } else {
                write!(f, " {}", arg.value.to_string_lossy())?;
            }
        }
        Ok(())
    }
}

/// What a finished process left behind.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success() -> Self {
        Self {
            status: Some(0),
            ..Self::default()
        }
    }

    pub fn failure(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            stderr: stderr.into(),
            ..Self::default()
        }
    }

    /// stderr and stdout together, lower-cased, for signature matching.
    pub fn diagnostics(&self) -> String {
        format!("{}\n{}", self.stderr, self.stdout).to_lowercase()
    }
}

/// Runs a [`CommandSpec`] to completion or until `timeout` elapses.
///
/// Implementations must return [`EngineError::Timeout`] when the budget is
/// exhausted and must not leave the process running afterwards.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec, timeout: Duration) -> Result<CommandOutput, EngineError>;
}

/// Spawns real child processes with `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec, timeout: Duration) -> Result<CommandOutput, EngineError> {
        debug!(command = %spec, timeout_ms = timeout.as_millis() as u64, "spawning");
        let started = Instant::now();

        let child = tokio::process::Command::new(spec.program())
            .args(spec.arg_values())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => EngineError::DependencyMissing {
                    binary: spec.program(),
                    tool: None,
                },
                _ => EngineError::Io(e),
            })?;

        // On timeout the `wait_with_output` future is dropped together with
        // the child, and `kill_on_drop` terminates the process.
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(program = spec.program(), timeout_ms = timeout.as_millis() as u64, "command timed out");
                return Err(EngineError::Timeout {
                    program: spec.program(),
                    after: timeout,
                });
            }
        };

        debug!(
            program = spec.program(),
            status = ?output.status.code(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "command finished"
        );

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display_redacts_secret_args() {
        let spec = CommandSpec::new(Binary::Qpdf)
            .secret_arg("--password=hunter2")
            .args(["--decrypt", "in.pdf", "out.pdf"]);
        let rendered = spec.to_string();
        assert_eq!(rendered, "qpdf <redacted> --decrypt in.pdf out.pdf");
        assert!(!format!("{spec:?}").contains("hunter2"));
        // The real value still reaches the process.
        assert!(spec.arg_values().any(|a| a == "--password=hunter2"));
    }

    #[test]
    fn lookups_find_flag_values() {
        let spec = CommandSpec::new(Binary::Soffice)
            .args(["--convert-to", "pdf", "--outdir", "/tmp/out", "/tmp/in/a.docx"])
            .arg_with_path("-sOutputFile=", Path::new("/tmp/out/x.pdf"));
        assert_eq!(spec.value_after("--outdir"), Some(OsStr::new("/tmp/out")));
        assert_eq!(spec.value_after("--missing"), None);
        assert_eq!(spec.value_with_prefix("-sOutputFile=").as_deref(), Some("/tmp/out/x.pdf"));
    }

    #[test]
    fn success_codes_are_configurable() {
        let spec = CommandSpec::new(Binary::Qpdf).success_codes(&[0, 3]);
        assert!(spec.is_success(Some(3)));
        assert!(!spec.is_success(Some(2)));
        assert!(!spec.is_success(None));
    }

    #[test]
    fn diagnostics_are_lowercased_and_joined() {
        let out = CommandOutput {
            status: Some(1),
            stdout: "Out".into(),
            stderr: "ERR".into(),
        };
        assert_eq!(out.diagnostics(), "err\nout");
    }
}
