//! Runs generated Python snippets on the host interpreter.
//!
//! There is no sandbox here. A snippet runs with the full permissions of
//! the assistant process: it sees the real filesystem, the network and
//! every environment variable. Read code before running it, and point
//! the runner at a throwaway interpreter or container when in doubt.
//! The optional timeout bounds runaway loops but does not contain
//! hostile code.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::warn;

/// Outcome of one snippet run. Failures to even start the interpreter
/// land in `stderr` rather than an error, so callers always get a
/// report to show.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub stdout: String,
    pub stderr: String,
    pub succeeded: bool,
}

impl ExecutionReport {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: message.into(),
            succeeded: false,
        }
    }
}

/// Executes Python source via a configurable interpreter.
pub struct PythonRunner {
    program: String,
    timeout: Option<Duration>,
}

impl Default for PythonRunner {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            timeout: None,
        }
    }
}

impl PythonRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Writes the snippet to a temp file and runs it, capturing output.
    /// Never returns an error; whatever goes wrong becomes a failed
    /// report.
    pub async fn execute(&self, source: &str) -> ExecutionReport {
        let source = strip_code_fences(source);

        let file = match tempfile::Builder::new()
            .prefix("codesmith-snippet")
            .suffix(".py")
            .tempfile()
        {
            Ok(file) => file,
            Err(e) => return ExecutionReport::failed(format!("could not stage snippet: {e}")),
        };
        if let Err(e) = std::fs::write(file.path(), source.as_bytes()) {
            return ExecutionReport::failed(format!("could not stage snippet: {e}"));
        }

        let mut cmd = Command::new(&self.program);
        cmd.arg(file.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, cmd.output()).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("Snippet execution exceeded {:?}", limit);
                    return ExecutionReport::failed(format!("execution exceeded {limit:?}"));
                }
            },
            None => cmd.output().await,
        };

        match result {
            Ok(output) => ExecutionReport {
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                succeeded: output.status.success(),
            },
            Err(e) => ExecutionReport::failed(format!("could not run {}: {}", self.program, e)),
        }
    }
}

/// Drops a surrounding markdown fence so staged model output runs as-is.
pub fn strip_code_fences(source: &str) -> String {
    let trimmed = source.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let mut lines: Vec<&str> = trimmed.lines().collect();
    lines.remove(0);
    if let Some(last) = lines.last() {
        if last.trim() == "```" {
            lines.pop();
        }
    }
    lines.join("\n")
}
