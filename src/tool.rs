//! Execution of the external command-line collaborators (scanner, patcher, signer)

use crate::logging::Logger;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

/// Captured output of a successful run
#[derive(Debug)]
pub struct ToolOutput {
    pub stdout: Vec<u8>,
    pub stderr: String,
}

/// Run `command` to completion within `timeout`.
///
/// The child is killed if the returned future is dropped, so cancelling the
/// batch stops the tool too. Failures come back as a message for the caller
/// to wrap in its own error variant.
pub async fn run(
    mut command: Command,
    timeout: Duration,
    output: &Logger,
) -> std::result::Result<ToolOutput, String> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let program = command.as_std().get_program().to_string_lossy().to_string();
    output.detail(&format!("Running {:?}", command.as_std()));
    let start = Instant::now();

    let result = tokio::time::timeout(timeout, command.output())
        .await
        .map_err(|_| format!("{} timed out after {}", program, output.format_duration(timeout)))?
        .map_err(|e| format!("cannot run {}: {}", program, e))?;

    let stderr = String::from_utf8_lossy(&result.stderr).trim().to_string();
    if !result.status.success() {
        let code = result
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        return Err(format!("{} exited with {}: {}", program, code, stderr));
    }

    output.detail(&format!(
        "{} finished in {}",
        program,
        output.format_duration(start.elapsed())
    ));
    Ok(ToolOutput {
        stdout: result.stdout,
        stderr,
    })
}
