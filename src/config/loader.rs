// Configuration file loading

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const RALPHY_DIR: &str = ".ralphy";
pub const CONFIG_FILE: &str = "config.yaml";
pub const PROGRESS_FILE: &str = "progress.txt";

/// Ralphy configuration from .ralphy/config.yaml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RalphyConfig {
    /// Project info
    #[serde(default)]
    pub project: ProjectInfo,
    /// Test/lint/build commands
    #[serde(default)]
    pub commands: CommandsConfig,
    /// Rules the agent must follow; injected into every prompt
    #[serde(default)]
    pub rules: Vec<String>,
    /// Paths the agent must not touch
    #[serde(default)]
    pub boundaries: Boundaries,
}

/// Project info section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub framework: String,
    #[serde(default)]
    pub description: String,
}

/// Commands section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandsConfig {
    #[serde(default)]
    pub test: String,
    #[serde(default)]
    pub lint: String,
    #[serde(default)]
    pub build: String,
}

/// Boundaries section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Boundaries {
    #[serde(default)]
    pub never_touch: Vec<String>,
}

/// Full path to the .ralphy directory
pub fn ralphy_dir(work_dir: &Path) -> PathBuf {
    work_dir.join(RALPHY_DIR)
}

/// Full path to the config file
pub fn config_path(work_dir: &Path) -> PathBuf {
    ralphy_dir(work_dir).join(CONFIG_FILE)
}

/// Full path to the progress log
pub fn progress_path(work_dir: &Path) -> PathBuf {
    ralphy_dir(work_dir).join(PROGRESS_FILE)
}

/// Check if ralphy is initialized in the directory
pub fn is_initialized(work_dir: &Path) -> bool {
    config_path(work_dir).exists()
}

/// Load the config from disk. A missing file yields None; an unreadable
/// or unparseable file falls back to the defaults.
pub fn load_config(work_dir: &Path) -> Option<RalphyConfig> {
    let path = config_path(work_dir);
    if !path.exists() {
        return None;
    }

    let content = fs::read_to_string(&path).ok()?;
    match serde_yaml::from_str(&content) {
        Ok(config) => Some(config),
        Err(error) => {
            log::warn!("[Config] Failed to parse {}: {}", path.display(), error);
            Some(RalphyConfig::default())
        }
    }
}

/// Rules from config
pub fn load_rules(work_dir: &Path) -> Vec<String> {
    load_config(work_dir).map(|c| c.rules).unwrap_or_default()
}

/// Boundary paths from config
pub fn load_boundaries(work_dir: &Path) -> Vec<String> {
    load_config(work_dir)
        .map(|c| c.boundaries.never_touch)
        .unwrap_or_default()
}

/// Project context as a formatted block for prompts
pub fn load_project_context(work_dir: &Path) -> String {
    let config = match load_config(work_dir) {
        Some(config) => config,
        None => return String::new(),
    };

    let mut parts = Vec::new();
    if !config.project.name.is_empty() {
        parts.push(format!("Project: {}", config.project.name));
    }
    if !config.project.language.is_empty() {
        parts.push(format!("Language: {}", config.project.language));
    }
    if !config.project.framework.is_empty() {
        parts.push(format!("Framework: {}", config.project.framework));
    }
    if !config.project.description.is_empty() {
        parts.push(format!("Description: {}", config.project.description));
    }

    parts.join("\n")
}
