//! Execution request/result types and output truncation

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::EngineConfig;
use crate::parser::ParsedOutput;

/// Lines kept from each end of truncated output
const TRUNCATE_CONTEXT_LINES: usize = 10;

/// A single command to run inside a container. Immutable once submitted.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub container: String,
    pub command: String,
    /// Caller-requested timeout; clamped against the configured maximum
    pub timeout: Option<Duration>,
    /// Route through the persistent session for this container
    pub use_session: bool,
}

impl ExecutionRequest {
    pub fn new(container: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            command: command.into(),
            timeout: None,
            use_session: false,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn use_session(mut self, yes: bool) -> Self {
        self.use_session = yes;
        self
    }
}

/// How a command finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDisposition {
    /// Process exited with this code
    Exited(i32),
    /// Deadline expired and the process was killed
    TimedOut,
}

impl ExitDisposition {
    /// Exit code, or `None` for a timeout
    pub fn code(&self) -> Option<i32> {
        match self {
            ExitDisposition::Exited(code) => Some(*code),
            ExitDisposition::TimedOut => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExitDisposition::Exited(0))
    }

    pub fn timed_out(&self) -> bool {
        matches!(self, ExitDisposition::TimedOut)
    }
}

impl Serialize for ExitDisposition {
    /// Wire form matches the original tooling: `-1` stands in for a timeout,
    /// with the `timed_out` flag on the surrounding result as the real signal.
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.code().unwrap_or(-1))
    }
}

/// Outcome of one command execution. Created exactly once per request.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub container: String,
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    #[serde(rename = "exit_code")]
    pub exit: ExitDisposition,
    pub timed_out: bool,
    #[serde(serialize_with = "serialize_millis", rename = "duration_ms")]
    pub duration: Duration,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stdout_truncated: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stderr_truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_stdout_lines: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_stderr_lines: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsed_output: Option<ParsedOutput>,
}

fn serialize_millis<S: serde::Serializer>(
    duration: &Duration,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

impl ExecutionResult {
    pub fn new(
        request: &ExecutionRequest,
        stdout: String,
        stderr: String,
        exit: ExitDisposition,
        started_at: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            container: request.container.clone(),
            command: request.command.clone(),
            stdout,
            stderr,
            exit,
            timed_out: exit.timed_out(),
            duration,
            started_at,
            ended_at: started_at
                + chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero()),
            stdout_truncated: false,
            stderr_truncated: false,
            original_stdout_lines: None,
            original_stderr_lines: None,
            parsed_output: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit.is_success()
    }

    /// Apply configured head/tail truncation to captured output.
    /// stderr runs with half the stdout limits.
    pub fn apply_truncation(&mut self, config: &EngineConfig) {
        if config.max_output_lines == 0 && config.max_output_chars == 0 {
            return;
        }
        let (stdout, truncated, original) = truncate_output(
            &self.stdout,
            config.max_output_lines,
            config.max_output_chars,
        );
        if truncated {
            self.stdout = stdout;
            self.stdout_truncated = true;
            self.original_stdout_lines = Some(original);
        }
        let (stderr, truncated, original) = truncate_output(
            &self.stderr,
            config.max_output_lines / 2,
            config.max_output_chars / 2,
        );
        if truncated {
            self.stderr = stderr;
            self.stderr_truncated = true;
            self.original_stderr_lines = Some(original);
        }
    }
}

/// Head/tail truncation preserving context from both ends.
///
/// Returns the (possibly shortened) text, whether anything was cut, and the
/// original line count. Limits of 0 disable the corresponding check.
pub fn truncate_output(
    output: &str,
    max_lines: usize,
    max_chars: usize,
) -> (String, bool, usize) {
    if output.is_empty() {
        return (String::new(), false, 0);
    }

    let lines: Vec<&str> = output.split('\n').collect();
    let original_line_count = lines.len();
    let mut result = output.to_string();
    let mut was_truncated = false;

    if max_lines > 0 && lines.len() > max_lines {
        // Context windows cannot exceed half the line limit
        let context = TRUNCATE_CONTEXT_LINES.min(max_lines / 2).max(1);
        let head = &lines[..context];
        let tail = &lines[lines.len() - context..];
        let cut = lines.len().saturating_sub(2 * context);
        result = format!(
            "{}\n... [{} lines truncated] ...\n{}",
            head.join("\n"),
            cut,
            tail.join("\n")
        );
        was_truncated = true;
    }

    if max_chars > 0 && result.len() > max_chars {
        let original_chars = result.len();
        let mut cutoff = max_chars;
        while !result.is_char_boundary(cutoff) {
            cutoff -= 1;
        }
        result.truncate(cutoff);
        result.push_str(&format!(
            "\n... [truncated at {max_chars} chars, original: {original_chars} chars] ..."
        ));
        was_truncated = true;
    }

    (result, was_truncated, original_line_count)
}
