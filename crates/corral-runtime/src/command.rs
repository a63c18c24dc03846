//! External command execution.
//!
//! Every call into the host's container tooling goes through a
//! [`CommandRunner`], so backends can be exercised without a real runtime
//! and every invocation carries a hard timeout.

use crate::error::{Result, RuntimeError};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Maximum captured output per stream in bytes (1 MB).
const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// Default bound applied when a spec does not set one.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// One invocation of an external program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Lifecycle step this invocation belongs to (used in errors and logs).
    pub stage: String,
    /// Program to run.
    pub program: String,
    /// Arguments, passed without a shell.
    pub args: Vec<String>,
    /// Data written to the child's stdin. Never logged.
    pub stdin: Option<String>,
    /// Hard bound on the invocation.
    pub timeout: Duration,
}

impl CommandSpec {
    /// Start a spec for `program` under the given stage name.
    pub fn new(stage: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Feed `data` to the child's stdin.
    pub fn stdin(mut self, data: impl Into<String>) -> Self {
        self.stdin = Some(data.into());
        self
    }

    /// Set the invocation timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `program arg1 arg2 ...`, for logs.
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Captured result of a finished invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (-1 if terminated by a signal).
    pub exit_code: i32,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code and stderr.
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Whether the tool exited zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// The most useful text to show an operator when the tool failed.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        format!("exit code {}", self.exit_code)
    }

    /// Map a non-zero exit into [`RuntimeError::CommandFailed`].
    pub fn into_result(self, stage: &str) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(RuntimeError::CommandFailed {
                stage: stage.to_string(),
                diagnostic: self.diagnostic(),
            })
        }
    }
}

/// Executes [`CommandSpec`]s.
///
/// Implementations return `Ok` for any invocation that ran to completion,
/// whatever its exit code; `Err` is reserved for spawn failures and timeouts.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run one invocation to completion.
    async fn run(&self, spec: CommandSpec) -> Result<CommandOutput>;
}

/// Runs commands as host processes via `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner;

impl SystemRunner {
    /// Create a new system runner.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: CommandSpec) -> Result<CommandOutput> {
        let start = std::time::Instant::now();
        tracing::debug!(stage = %spec.stage, cmd = %spec.display(), "Running command");

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            tracing::warn!(program = %spec.program, error = %e, "Failed to spawn command");
            RuntimeError::Spawn {
                program: spec.program.clone(),
                source: e,
            }
        })?;

        if let Some(data) = &spec.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(data.as_bytes()).await?;
                stdin.shutdown().await?;
            }
        }

        // Dropping the future on timeout kills the child (kill_on_drop).
        let output = match tokio::time::timeout(spec.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::error!(
                    stage = %spec.stage,
                    cmd = %spec.display(),
                    timeout_secs = spec.timeout.as_secs(),
                    "Command timed out"
                );
                return Err(RuntimeError::TimedOut {
                    stage: spec.stage,
                    after: spec.timeout,
                });
            }
        };

        let result = CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: truncate_output(String::from_utf8_lossy(&output.stdout).into_owned()),
            stderr: truncate_output(String::from_utf8_lossy(&output.stderr).into_owned()),
        };
        tracing::debug!(
            stage = %spec.stage,
            exit_code = result.exit_code,
            stdout_len = result.stdout.len(),
            stderr_len = result.stderr.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Command completed"
        );
        Ok(result)
    }
}

/// A command to run as root inside a guest.
///
/// Arguments are passed as argv, never through a guest shell, so values
/// such as passwords cannot break out of their position. Secrets belong in
/// `stdin`, which is never logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestCommand {
    /// argv of the guest process.
    pub argv: Vec<String>,
    /// Data written to the guest process's stdin.
    pub stdin: Option<String>,
}

impl GuestCommand {
    /// A guest command with the given argv.
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            stdin: None,
        }
    }

    /// Set the root password via `chpasswd`, password on stdin.
    pub fn set_root_password(password: &str) -> Self {
        Self {
            argv: vec!["chpasswd".to_string()],
            stdin: Some(format!("root:{password}\n")),
        }
    }
}

/// Truncate to [`MAX_OUTPUT_SIZE`], preserving UTF-8 boundaries.
fn truncate_output(s: String) -> String {
    if s.len() <= MAX_OUTPUT_SIZE {
        return s;
    }
    let mut end = MAX_OUTPUT_SIZE;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    let mut truncated = s[..end].to_string();
    truncated.push_str("\n... [output truncated]");
    truncated
}
