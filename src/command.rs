//! External command execution
//!
//! Every cluster interaction goes through [`CommandRunner`], so the
//! provisioning logic can be exercised against a scripted runner in tests.
//!
//! A command that fails may still have mutated the cluster (a half-applied
//! manifest, a created-but-unhealthy node). Callers verify outcomes with
//! readiness waits instead of trusting exit codes alone.

use std::fmt;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::{Error, Result};

/// An external command to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Executable name, resolved via PATH
    pub program: String,
    /// Arguments
    pub args: Vec<String>,
    /// Data piped to the process on stdin
    pub stdin: Option<String>,
}

impl CommandSpec {
    /// Create a command for `program` with no arguments
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Pipe `input` to the process
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Rendered command line, e.g. `kubectl apply -f -`
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Whether the process exited with status zero
    pub success: bool,
    /// Exit code, if the process exited normally
    pub code: Option<i32>,
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
}

impl CommandOutput {
    /// A successful result with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed result with the given exit code and stderr
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// stdout followed by stderr
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr.trim_end()),
            (false, true) => self.stdout.trim_end().to_string(),
            (true, false) => self.stderr.trim_end().to_string(),
            (true, true) => String::new(),
        }
    }

    /// `Ok(self)` on success, otherwise [`Error::CommandFailed`] for `spec`
    pub fn into_result(self, spec: &CommandSpec) -> Result<Self> {
        if self.success {
            return Ok(self);
        }
        Err(Error::CommandFailed {
            command: spec.command_line(),
            status: self.status_description(),
            output: self.combined(),
        })
    }

    fn status_description(&self) -> String {
        match self.code {
            Some(code) => format!("exit status: {}", code),
            None => "terminated by signal".to_string(),
        }
    }

    fn from_parts(status: ExitStatus, stdout: Vec<u8>, stderr: Vec<u8>) -> Self {
        Self {
            success: status.success(),
            code: status.code(),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        }
    }
}

/// Handle to a process that was started and deliberately left running.
///
/// The process is not awaited, not joined, and not owned: it outlives this
/// program and nothing here stops it. Dropping the handle does nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachedProcess {
    /// Command line that was launched
    pub command: String,
    /// OS process id at launch time
    pub pid: Option<u32>,
}

/// Trait for executing external commands (allows mocking in tests)
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion and capture its output.
    ///
    /// A non-zero exit is not an error here; only failing to launch is.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Start a command in the background without waiting on it
    async fn spawn_detached(&self, spec: &CommandSpec) -> Result<DetachedProcess>;

    /// Whether `tool` can be found on PATH
    fn tool_available(&self, tool: &str) -> bool;

    /// Run a command and turn a non-zero exit into [`Error::CommandFailed`].
    ///
    /// The captured output is logged before the error is returned so the
    /// user can diagnose without rerunning.
    async fn run_checked(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let output = self.run(spec).await?;
        if !output.success {
            let combined = output.combined();
            if !combined.is_empty() {
                warn!(command = %spec, "{}", combined);
            }
        }
        output.into_result(spec)
    }
}

/// Real command runner that executes actual system commands
#[derive(Debug, Default, Clone)]
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        debug!(command = %spec, "Executing");

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });

        let mut child = command.spawn().map_err(|e| Error::CommandFailed {
            command: spec.command_line(),
            status: "failed to start".to_string(),
            output: e.to_string(),
        })?;

        if let (Some(input), Some(mut stdin)) = (spec.stdin.as_deref(), child.stdin.take()) {
            stdin.write_all(input.as_bytes()).await?;
            // Close stdin so the child sees EOF
            drop(stdin);
        }

        let output = child.wait_with_output().await?;
        Ok(CommandOutput::from_parts(
            output.status,
            output.stdout,
            output.stderr,
        ))
    }

    async fn spawn_detached(&self, spec: &CommandSpec) -> Result<DetachedProcess> {
        debug!(command = %spec, "Starting detached process");

        let mut command = std::process::Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        // Own process group, so a Ctrl-C aimed at us does not reach it
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let child = command.spawn().map_err(|e| Error::CommandFailed {
            command: spec.command_line(),
            status: "failed to start".to_string(),
            output: e.to_string(),
        })?;

        Ok(DetachedProcess {
            command: spec.command_line(),
            pid: Some(child.id()),
        })
    }

    fn tool_available(&self, tool: &str) -> bool {
        which::which(tool).is_ok()
    }
}
