//! Shell command execution for build steps.
//!
//! Commands are opaque strings handed to the platform shell (`sh -c` or
//! `cmd /C`), so pipes, globs and `&&` chains in type configs work as written.
//! A non-zero exit is data, not an error: it comes back in
//! [`CommandResult::exit_code`] and the caller decides what it means.

use std::collections::{HashMap, VecDeque};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, instrument, warn, Instrument, Span};

use crate::env_vars::EnvOverrides;

/// Lines of stderr kept from a streamed command for failure reports
pub const STREAM_STDERR_TAIL: usize = 50;

/// Outcome of one command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    pub exit_code: i32,
    /// Empty when the command was streamed
    pub stdout: String,
    /// Full stderr, or its last [`STREAM_STDERR_TAIL`] lines when streamed
    pub stderr: String,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    fn spawn_failure(message: String) -> Self {
        Self {
            exit_code: 1,
            stdout: String::new(),
            stderr: message,
        }
    }
}

/// Seam between the orchestrator and process spawning
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` in `cwd`. With `stream`, output lines are forwarded to
    /// the log as they arrive instead of being returned.
    async fn run(&self, command: &str, cwd: &Path, stream: bool) -> CommandResult;
}

/// Runs commands through the system shell
#[derive(Debug, Clone, Default)]
pub struct ShellRunner {
    env: Vec<(String, OsString)>,
}

impl ShellRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `overrides` to every spawned command
    pub fn with_overrides(overrides: &EnvOverrides) -> anyhow::Result<Self> {
        Ok(Self {
            env: overrides.resolved()?,
        })
    }

    fn shell_command(&self, command: &str, cwd: &Path) -> Command {
        #[cfg(windows)]
        let mut cmd = {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(command);
            cmd
        };
        #[cfg(not(windows))]
        let mut cmd = {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(command);
            cmd
        };

        cmd.current_dir(cwd)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run_captured(&self, command: &str, cwd: &Path) -> CommandResult {
        match self.shell_command(command, cwd).output().await {
            Ok(output) => CommandResult {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            },
            Err(e) => {
                warn!(%command, cwd = %cwd.display(), error = %e, "Failed to spawn command");
                CommandResult::spawn_failure(format!("failed to spawn `{}`: {}", command, e))
            }
        }
    }

    async fn run_streamed(&self, command: &str, cwd: &Path) -> CommandResult {
        let mut child = match self.shell_command(command, cwd).spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(%command, cwd = %cwd.display(), error = %e, "Failed to spawn command");
                return CommandResult::spawn_failure(format!(
                    "failed to spawn `{}`: {}",
                    command, e
                ));
            }
        };

        let stdout_task = spawn_forward_task(child.stdout.take(), "stdout", 0);
        let stderr_task = spawn_forward_task(child.stderr.take(), "stderr", STREAM_STDERR_TAIL);

        let status = child.wait().await;
        let _ = stdout_task.await;
        let stderr_tail = stderr_task.await.unwrap_or_default();

        match status {
            Ok(status) => CommandResult {
                exit_code: status.code().unwrap_or(-1),
                stdout: String::new(),
                stderr: stderr_tail,
            },
            Err(e) => CommandResult::spawn_failure(format!("failed to wait for `{}`: {}", command, e)),
        }
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    #[instrument(skip_all, fields(command = %command, cwd = %cwd.display()))]
    async fn run(&self, command: &str, cwd: &Path, stream: bool) -> CommandResult {
        debug!("Running command");
        let result = if stream {
            self.run_streamed(command, cwd).await
        } else {
            self.run_captured(command, cwd).await
        };
        debug!(exit_code = result.exit_code, "Command finished");
        result
    }
}

/// Forward each line of `stream` to the log, keeping the last `keep` lines.
///
/// Lines are decoded lossily and the pipe is drained to EOF, so output that
/// is not UTF-8 never closes it early on the child.
fn spawn_forward_task(
    stream: Option<impl AsyncRead + Unpin + Send + 'static>,
    name: &'static str,
    keep: usize,
) -> tokio::task::JoinHandle<String> {
    let task = async move {
        let Some(stream) = stream else {
            return String::new();
        };

        let mut tail: VecDeque<String> = VecDeque::with_capacity(keep);
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']);
                    info!(stream = name, "{}", line);
                    if keep > 0 {
                        if tail.len() == keep {
                            tail.pop_front();
                        }
                        tail.push_back(line.to_string());
                    }
                }
                Err(e) => {
                    warn!(stream = name, error = %e, "Failed to read command output");
                    break;
                }
            }
        }

        tail.into_iter().collect::<Vec<_>>().join("\n")
    };
    tokio::spawn(task.instrument(Span::current()))
}

/// A command seen by [`MockRunner`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockInvocation {
    pub command: String,
    pub cwd: PathBuf,
    pub stream: bool,
}

/// Test double that records invocations and returns scripted results.
///
/// Commands without a scripted result succeed with empty output.
#[derive(Debug, Clone, Default)]
pub struct MockRunner {
    results: Arc<Mutex<HashMap<String, CommandResult>>>,
    pub invocations: Arc<Mutex<Vec<MockInvocation>>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `command` exit with `exit_code` and `stderr`
    pub fn fail(self, command: &str, exit_code: i32, stderr: &str) -> Self {
        self.respond(
            command,
            CommandResult {
                exit_code,
                stdout: String::new(),
                stderr: stderr.to_string(),
            },
        )
    }

    pub fn respond(self, command: &str, result: CommandResult) -> Self {
        self.results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(command.to_string(), result);
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.get_invocations().into_iter().map(|i| i.command).collect()
    }

    pub fn get_invocations(&self) -> Vec<MockInvocation> {
        self.invocations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, command: &str, cwd: &Path, stream: bool) -> CommandResult {
        self.invocations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(MockInvocation {
                command: command.to_string(),
                cwd: cwd.to_path_buf(),
                stream,
            });
        self.results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(command)
            .cloned()
            .unwrap_or_default()
    }
}
