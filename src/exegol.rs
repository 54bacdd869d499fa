//! Process Runner: one-shot dispatch through the Exegol CLI
//!
//! The external CLI is treated as an opaque, potentially slow collaborator.
//! Commands are passed as discrete argv elements (`exegol exec -v <container>
//! <command>`), never assembled into a host-side shell string.

use std::process::Stdio;
use std::time::Instant;

use chrono::Utc;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::container::Container;
use crate::error::{EngineError, Result};
use crate::execution::{ExecutionRequest, ExecutionResult, ExitDisposition};

/// Thin adapter around the Exegol CLI executable
#[derive(Debug, Clone)]
pub struct ExegolCli {
    path: String,
}

impl ExegolCli {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Run one command in a container, killing the child at the deadline.
    ///
    /// A timeout is not an `Err`: the result carries the timeout sentinel and
    /// whatever output was buffered before termination.
    #[instrument(skip(self, request), fields(container = %request.container))]
    pub async fn exec(
        &self,
        request: &ExecutionRequest,
        timeout: std::time::Duration,
    ) -> Result<ExecutionResult> {
        info!(command = %request.command, "dispatching one-shot command");

        let mut child = Command::new(&self.path)
            .arg("exec")
            .arg("-v")
            .arg(&request.container)
            .arg(&request.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let started_at = Utc::now();
        let start = Instant::now();

        let mut stdout_pipe = child.stdout.take().expect("stdout is piped");
        let mut stderr_pipe = child.stderr.take().expect("stderr is piped");
        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();

        let waited = tokio::time::timeout(timeout, async {
            let (out, err) = tokio::join!(
                stdout_pipe.read_to_end(&mut stdout_buf),
                stderr_pipe.read_to_end(&mut stderr_buf),
            );
            out?;
            err?;
            child.wait().await
        })
        .await;

        let exit = match waited {
            Ok(Ok(status)) => ExitDisposition::Exited(status.code().unwrap_or(-1)),
            Ok(Err(e)) => return Err(EngineError::Io(e)),
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "command deadline expired, killing child");
                child.start_kill().ok();
                let _ = child.wait().await;
                ExitDisposition::TimedOut
            }
        };

        let duration = start.elapsed();
        let stdout = String::from_utf8_lossy(&stdout_buf).into_owned();
        let stderr = String::from_utf8_lossy(&stderr_buf).into_owned();

        // The CLI reports container problems on stderr rather than failing
        // to spawn; surface those as their own failure classes.
        if !exit.timed_out() && !exit.is_success() {
            let stderr_lower = stderr.to_lowercase();
            if stderr_lower.contains("container") {
                if stderr_lower.contains("not found") || stderr_lower.contains("does not exist") {
                    return Err(EngineError::ContainerNotFound {
                        name: request.container.clone(),
                    });
                }
                if stderr_lower.contains("not running") || stderr_lower.contains("is stopped") {
                    return Err(EngineError::ContainerNotRunning {
                        name: request.container.clone(),
                        status: "stopped".to_string(),
                    });
                }
            }
        }

        debug!(
            exit_code = ?exit.code(),
            duration_ms = duration.as_millis() as u64,
            "command finished"
        );

        Ok(ExecutionResult::new(
            request, stdout, stderr, exit, started_at, duration,
        ))
    }

    /// Enumerate containers via `exegol info`
    #[instrument(skip(self))]
    pub async fn list_containers(&self) -> Result<Vec<Container>> {
        let output = Command::new(&self.path)
            .arg("info")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "exegol info returned non-zero");
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let containers: Vec<Container> =
            stdout.lines().filter_map(Container::from_info_line).collect();
        debug!(count = containers.len(), "enumerated containers");
        Ok(containers)
    }

    /// Probe the CLI version; `None` means the CLI is unavailable.
    pub async fn version(&self) -> Option<String> {
        let output = Command::new(&self.path)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .ok()?;
        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if version.is_empty() {
            None
        } else {
            Some(version)
        }
    }

    fn spawn_error(&self, e: std::io::Error) -> EngineError {
        if e.kind() == std::io::ErrorKind::NotFound {
            EngineError::ExegolNotFound {
                path: self.path.clone(),
            }
        } else {
            EngineError::Io(e)
        }
    }
}
