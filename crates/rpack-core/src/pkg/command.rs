//! Bounded external command execution.

use super::error::PkgError;
use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Captured result of a finished (or killed) process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `-1` when killed or terminated by a signal.
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == 0 && !self.timed_out
    }
}

/// Run `program args..`, killing it once `timeout` elapses.
///
/// A killed process is reported as exit code `-1` with a synthesized stderr;
/// this is not an `Err`.
///
/// # Errors
/// Returns an error only if the process cannot be spawned.
pub async fn run_command<I, S>(
    program: &Path,
    args: I,
    timeout: Duration,
) -> Result<CommandOutput, PkgError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| PkgError::io(format!("Failed to run {}: {e}", program.display())))?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            timed_out: false,
        }),
        Ok(Err(e)) => Err(PkgError::io(format!(
            "Failed to wait for {}: {e}",
            program.display()
        ))),
        // Dropping the wait future drops the child, which kills it
        Err(_) => Ok(CommandOutput {
            code: -1,
            stdout: String::new(),
            stderr: format!(
                "The process is taking too long, more than {} seconds, killed it!",
                timeout.as_secs()
            ),
            timed_out: true,
        }),
    }
}
