use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::config::ForgelineConfig;
use crate::error::output_details;

/// Captured outcome of one external process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageResult {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl StageResult {
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn details(&self) -> String {
        output_details(&self.stdout, &self.stderr)
    }

    fn from_output(output: Output) -> Self {
        Self {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// Failures to execute a command at all. A non-zero exit is not one of these.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Failed to spawn '{shell}' in {}: {source}", .working_dir.display())]
    Spawn {
        shell: String,
        working_dir: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Command timed out after {}s", .limit.as_secs())]
    Timeout {
        limit: Duration,
        stdout: String,
        stderr: String,
    },

    #[error("Failed to collect process output: {0}")]
    Output(#[source] io::Error),
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Runs `command_line` inside `working_dir` and waits for it to exit
    async fn run(&self, working_dir: &Path, command_line: &str) -> Result<StageResult, RunError>;
}

/// Runs command lines through `<shell> -c`
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
    timeout: Option<Duration>,
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new("/bin/bash")
    }
}

impl ShellRunner {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            timeout: None,
        }
    }

    pub fn from_config(config: &ForgelineConfig) -> Self {
        Self::new(config.shell.clone()).with_timeout(config.stage_timeout())
    }

    /// Kills the whole process group when a command outlives `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self, working_dir: &Path, command_line: &str) -> Command {
        let mut command = Command::new(&self.shell);
        command
            .arg("-c")
            .arg(command_line)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        command.process_group(0);

        command
    }

    async fn wait_with_deadline(
        &self,
        mut child: Child,
        limit: Duration,
    ) -> Result<StageResult, RunError> {
        let stdout = tokio::spawn(drain(child.stdout.take()));
        let stderr = tokio::spawn(drain(child.stderr.take()));

        let status = match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => Some(status.map_err(RunError::Output)?),
            Err(_) => {
                warn!(
                    pid = child.id(),
                    timeout_secs = limit.as_secs(),
                    "Build command exceeded its deadline, killing process group"
                );
                if let Some(pid) = child.id() {
                    kill_process_group(pid);
                }
                if let Err(e) = child.kill().await {
                    debug!("Child already gone after group kill: {}", e);
                }
                None
            }
        };

        let stdout = join_output(stdout).await?;
        let stderr = join_output(stderr).await?;

        match status {
            Some(status) => Ok(StageResult {
                exit_code: status.code(),
                stdout,
                stderr,
            }),
            None => Err(RunError::Timeout {
                limit,
                stdout,
                stderr,
            }),
        }
    }
}

#[async_trait]
impl ProcessRunner for ShellRunner {
    async fn run(&self, working_dir: &Path, command_line: &str) -> Result<StageResult, RunError> {
        debug!(
            working_dir = %working_dir.display(),
            command = %command_line,
            "Executing build command"
        );

        let child = self
            .command(working_dir, command_line)
            .spawn()
            .map_err(|source| RunError::Spawn {
                shell: self.shell.clone(),
                working_dir: working_dir.to_path_buf(),
                source,
            })?;

        let result = match self.timeout {
            Some(limit) => self.wait_with_deadline(child, limit).await?,
            None => child
                .wait_with_output()
                .await
                .map(StageResult::from_output)
                .map_err(RunError::Output)?,
        };

        debug!(exit_code = ?result.exit_code, "Build command finished");
        Ok(result)
    }
}

async fn drain<R: AsyncRead + Unpin>(reader: Option<R>) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        reader.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

async fn join_output(
    handle: tokio::task::JoinHandle<io::Result<Vec<u8>>>,
) -> Result<String, RunError> {
    let bytes = handle
        .await
        .map_err(|e| RunError::Output(io::Error::new(io::ErrorKind::Other, e)))?
        .map_err(RunError::Output)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        warn!(pid, "Failed to kill process group: {}", e);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}
