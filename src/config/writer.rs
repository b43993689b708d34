// Config initialization and the progress log

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};

use super::loader::{self, RalphyConfig};

/// Completion status recorded in the progress log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Completed,
    Failed,
}

const DEFAULT_CONFIG: &str = r#"# Ralphy Configuration

# Project info (edit as needed)
project:
  name: ""
  language: ""
  framework: ""
  description: ""

# Commands available to agents for validating their work
commands:
  test: ""
  lint: ""
  build: ""

# Rules - instructions the AI MUST follow
# These are injected into every prompt
rules: []

# Boundaries - files/folders the AI should not modify
boundaries:
  never_touch: []
"#;

/// Initialize the .ralphy directory with a default config and an empty
/// progress log. An existing config is overwritten.
pub fn init_config(work_dir: &Path) -> Result<()> {
    let dir = loader::ralphy_dir(work_dir);
    fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

    fs::write(loader::config_path(work_dir), DEFAULT_CONFIG)
        .context("failed to write config.yaml")?;
    fs::write(loader::progress_path(work_dir), "# Ralphy Progress Log\n\n")
        .context("failed to write progress.txt")?;

    Ok(())
}

/// Append a rule to the config
pub fn add_rule(rule: &str, work_dir: &Path) -> Result<()> {
    let path = loader::config_path(work_dir);
    if !path.exists() {
        bail!("no config found, run 'ralphy --init' first");
    }

    let content = fs::read_to_string(&path)?;
    let mut config: RalphyConfig =
        serde_yaml::from_str(&content).context("failed to parse config")?;
    config.rules.push(rule.to_string());

    fs::write(&path, serde_yaml::to_string(&config)?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// Append a task outcome line to the progress log.
/// The log is write-only audit output; a missing log file is not an
/// error, it just means --init was never run here.
pub fn log_task_progress(task: &str, status: TaskStatus, work_dir: &Path) {
    let path = loader::progress_path(work_dir);
    if !path.exists() {
        return;
    }

    let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M");
    let icon = match status {
        TaskStatus::Completed => "✓",
        TaskStatus::Failed => "✗",
    };
    let line = format!("- [{}] {} - {}\n", icon, timestamp, task);

    let result = OpenOptions::new()
        .append(true)
        .open(&path)
        .and_then(|mut file| file.write_all(line.as_bytes()));
    if let Err(error) = result {
        log::warn!("[Progress] Failed to append to {}: {}", path.display(), error);
    }
}
