//! Running ffmpeg-family binaries as child processes.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use rf_core::Error;
use tokio::process::Command;

/// Upper bound for a single invocation unless the caller sets one.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3600);

/// Lines of stderr carried into a failure message.
const STDERR_TAIL: usize = 5;

#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

/// One invocation of an external binary. Stdin is closed and both output
/// streams are captured.
///
/// ```no_run
/// use rf_av::ToolCommand;
/// use std::path::PathBuf;
/// use std::time::Duration;
///
/// # async fn example() -> rf_core::Result<()> {
/// ToolCommand::new(PathBuf::from("ffmpeg"))
///     .args(["-y", "-i", "in.mov", "-c:v", "libx264", "out.mp4"])
///     .timeout(Duration::from_secs(600))
///     .execute()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ToolCommand {
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// Run to completion.
    ///
    /// A missing binary is [`Error::Config`] and is never retried. A non-zero
    /// exit is [`Error::Tool`] carrying the tail of stderr. Overrunning the
    /// timeout is [`Error::Timeout`]; the child is killed on drop, so a
    /// cancelled caller also stops the process.
    pub async fn execute(&self) -> rf_core::Result<ToolOutput> {
        let program_name = self.program_name();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(tool = %program_name, args = ?self.args, "Running tool");

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::Config(format!("{program_name} not found at {}", self.program.display()))
            } else {
                Error::tool(&program_name, format!("failed to spawn: {e}"))
            }
        })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(Error::tool(
                    program_name,
                    format!("I/O error waiting for process: {e}"),
                ))
            }
            Err(_elapsed) => return Err(Error::timeout(program_name, self.timeout)),
        };

        let tool_output = ToolOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        if !output.status.success() {
            return Err(Error::tool(
                program_name,
                format!(
                    "exited with status {}: {}",
                    output.status,
                    last_lines(&tool_output.stderr, STDERR_TAIL)
                ),
            ));
        }

        Ok(tool_output)
    }
}

/// ffmpeg prints the real error last.
fn last_lines(s: &str, n: usize) -> String {
    let lines: Vec<&str> = s.trim().lines().collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn sh(script: &str) -> ToolCommand {
        let mut cmd = ToolCommand::new(PathBuf::from("sh"));
        cmd.args(["-c", script]);
        cmd
    }

    #[tokio::test]
    async fn captures_stdout_of_successful_run() {
        let out = sh("echo encoded").execute().await.unwrap();
        assert!(out.status.success());
        assert_eq!(out.stdout.trim(), "encoded");
    }

    #[tokio::test]
    async fn non_zero_exit_reports_stderr_tail() {
        let err = sh("echo noise >&2; echo 'Invalid data found' >&2; exit 1")
            .execute()
            .await
            .unwrap_err();
        assert_matches!(err, Error::Tool { .. });
        assert!(err.to_string().contains("Invalid data found"), "{err}");
    }

    #[tokio::test]
    async fn missing_binary_is_not_retryable() {
        let err = ToolCommand::new(PathBuf::from("reelforge_no_such_tool"))
            .execute()
            .await
            .unwrap_err();
        assert_matches!(err, Error::Config(_));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn overrunning_the_timeout_is_retryable() {
        let err = sh("sleep 5")
            .timeout(Duration::from_millis(100))
            .execute()
            .await
            .unwrap_err();
        assert_matches!(err, Error::Timeout { .. });
        assert!(err.is_retryable());
    }

    #[test]
    fn stderr_tail_keeps_last_lines() {
        assert_eq!(last_lines("a\nb\nc\n", 2), "b\nc");
        assert_eq!(last_lines("only", 5), "only");
        assert_eq!(last_lines("", 5), "");
    }
}
