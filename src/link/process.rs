//! External process invocations
//!
//! Modem control, interface configuration, DHCP, clock sync and file
//! transfer all go through opaque system tools. Each call yields
//! `(success, stdout, stderr)`; a tool that cannot be started or does not
//! finish in time is a [`LoggerError::Command`].

use async_trait::async_trait;
use std::fmt;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::{LoggerError, Result};

/// Default timeout for a single process invocation
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// A process to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
    pub timeout: Duration,
}

impl ProcessCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Run `program` through `sudo` when `use_sudo` is set
    pub fn privileged(use_sudo: bool, program: impl Into<String>) -> Self {
        if use_sudo {
            Self::new("sudo").arg(program)
        } else {
            Self::new(program)
        }
    }

    /// Build from a configured argv list (first element is the program)
    pub fn from_argv(use_sudo: bool, argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::privileged(use_sudo, program.as_str()).args(args.iter().cloned()))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Space-joined command line, for logs and matching
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for ProcessCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Captured result of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Trait for running external processes
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &ProcessCommand) -> Result<CommandOutput>;
}

/// Runs commands on the host with `tokio::process`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, command: &ProcessCommand) -> Result<CommandOutput> {
        debug!("Running: {}", command);

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(if command.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                LoggerError::Command(format!("Failed to start {}: {}", command.program, e))
            })?;

        if let (Some(input), Some(mut stdin)) = (&command.stdin, child.stdin.take()) {
            stdin
                .write_all(input.as_bytes())
                .await
                .map_err(|e| {
                    LoggerError::Command(format!(
                        "Failed to write stdin of {}: {}",
                        command.program, e
                    ))
                })?;
            // Dropping stdin closes the pipe so batch tools see EOF
        }

        let output = tokio::time::timeout(command.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                LoggerError::Command(format!(
                    "{} timed out after {:?}",
                    command.program, command.timeout
                ))
            })?
            .map_err(|e| {
                LoggerError::Command(format!("Failed to wait for {}: {}", command.program, e))
            })?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
