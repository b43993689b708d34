// Subprocess execution for agent CLIs

use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::process::Command;

/// Captured output of a finished subprocess
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Run a command to completion in `work_dir`, capturing stdout and stderr
pub async fn exec_command(program: &str, args: &[&str], work_dir: &Path) -> Result<CommandOutput> {
    exec_command_with_env(program, args, work_dir, &[]).await
}

/// Run a command with extra environment variables
pub async fn exec_command_with_env(
    program: &str,
    args: &[&str],
    work_dir: &Path,
    env: &[(&str, &str)],
) -> Result<CommandOutput> {
    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(work_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    for (key, value) in env {
        command.env(key, value);
    }

    let output = command
        .output()
        .await
        .with_context(|| format!("failed to spawn {}", program))?;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}
