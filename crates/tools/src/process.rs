//! Child-process execution for command tools.
//!
//! Commands go through the platform shell (`bash -c` or `cmd.exe /c`), run
//! under a hard timeout, and are killed together with their process group
//! on timeout or cancellation. Output is captured whole and rendered into
//! the text block the model reads.

use async_trait::async_trait;
use envmedic_core::error::ToolError;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 32 * 1024;

/// How long to wait for pipe readers after the child is gone.
const READER_JOIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was ended by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Text shown to the model. Each stream is capped at `max_bytes`.
    pub fn render(&self, max_bytes: usize) -> String {
        let code = self
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "terminated by signal".into());
        format!(
            "Command execution exit code: {code}\nStd output:\n```\n{}\n```\nErr output: \n```\n{}\n```",
            truncate_tail(self.stdout.trim_end(), max_bytes),
            truncate_tail(self.stderr.trim_end(), max_bytes),
        )
    }
}

/// Keep the last `max_bytes` of `text`, cut on a char boundary, with a marker.
pub fn truncate_tail(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut start = text.len() - max_bytes;
    while start < text.len() && !text.is_char_boundary(start) {
        start += 1;
    }
    format!("[... {start} bytes truncated ...]\n{}", &text[start..])
}

/// Runs one shell command to completion.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, command: &str, cancel: &CancellationToken) -> Result<CommandOutput, ToolError>;
}

/// Production runner backed by `tokio::process`.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    program: String,
    flag: String,
    timeout: Duration,
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_TIMEOUT)
    }
}

impl ShellRunner {
    pub fn new(timeout: Duration) -> Self {
        let (program, flag) = if cfg!(windows) {
            ("cmd.exe", "/c")
        } else {
            ("bash", "-c")
        };
        Self {
            program: program.into(),
            flag: flag.into(),
            timeout,
        }
    }

    /// Use a different shell binary.
    pub fn with_shell(mut self, program: impl Into<String>, flag: impl Into<String>) -> Self {
        self.program = program.into();
        self.flag = flag.into();
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn build(&self, command: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg(&self.flag)
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }
}

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

#[async_trait]
impl ProcessRunner for ShellRunner {
    async fn run(&self, command: &str, cancel: &CancellationToken) -> Result<CommandOutput, ToolError> {
        if cancel.is_cancelled() {
            debug!(command = %command, "Run already cancelled, not spawning");
            return Err(ToolError::Cancelled {
                command: command.to_string(),
            });
        }
        debug!(command = %command, timeout_secs = self.timeout.as_secs(), "Spawning command");

        let mut child = self.build(command).spawn().map_err(|e| ToolError::ExecutionFailed {
            tool_name: self.program.clone(),
            reason: e.to_string(),
        })?;

        let stdout = spawn_reader(child.stdout.take());
        let stderr = spawn_reader(child.stderr.take());

        // Cancellation wins over a child that exits in the same poll.
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Outcome::Cancelled,
            status = child.wait() => Outcome::Exited(status),
            _ = tokio::time::sleep(self.timeout) => Outcome::TimedOut,
        };

        let status = match outcome {
            Outcome::Exited(status) => status.map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.program.clone(),
                reason: e.to_string(),
            })?,
            Outcome::TimedOut => {
                warn!(command = %command, "Command timed out, killing");
                terminate(&mut child).await;
                stdout.abort();
                stderr.abort();
                return Err(ToolError::Timeout {
                    command: command.to_string(),
                    timeout_secs: self.timeout.as_secs(),
                });
            }
            Outcome::Cancelled => {
                debug!(command = %command, "Run cancelled, killing command");
                terminate(&mut child).await;
                stdout.abort();
                stderr.abort();
                return Err(ToolError::Cancelled {
                    command: command.to_string(),
                });
            }
        };

        Ok(CommandOutput {
            exit_code: status.code(),
            stdout: join_reader(stdout).await,
            stderr: join_reader(stderr).await,
        })
    }
}

fn spawn_reader<R>(pipe: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    })
}

/// Background processes may keep the pipe open; don't wait on them forever.
async fn join_reader(mut handle: JoinHandle<Vec<u8>>) -> String {
    match tokio::time::timeout(READER_JOIN_TIMEOUT, &mut handle).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(Err(_)) => String::new(),
        Err(_) => {
            handle.abort();
            String::new()
        }
    }
}

/// Kill the child's whole process group, then the child itself.
async fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        #[cfg(unix)]
        {
            let _ = std::process::Command::new("kill")
                .arg("-KILL")
                .arg(format!("-{pid}"))
                .status();
        }
        #[cfg(windows)]
        {
            let _ = std::process::Command::new("taskkill")
                .args(["/PID", &pid.to_string(), "/T", "/F"])
                .output();
        }
    }
    let _ = child.kill().await;
}
