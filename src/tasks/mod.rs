// Task backlog sources

pub mod github;
pub mod markdown;
pub mod yaml;

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub use github::GitHubTaskSource;
pub use markdown::MarkdownTaskSource;
pub use yaml::YamlTaskSource;

/// A single unit of work pulled from a backlog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Source-specific identifier: line number for markdown, title for
    /// YAML, "number:title" for GitHub issues
    pub id: String,
    pub title: String,
    /// Full task body (GitHub issue body, YAML description)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Parallel group; 0 means the task must run sequentially
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_group: Option<u32>,
    pub completed: bool,
}

/// Backlog of work items, polymorphic over the backing format.
/// The orchestrator reads and mutates backlog state only through here.
pub enum TaskSource {
    Markdown(MarkdownTaskSource),
    Yaml(YamlTaskSource),
    GitHub(GitHubTaskSource),
}

impl TaskSource {
    /// All incomplete tasks, in backing-store order
    pub async fn all_tasks(&self) -> Result<Vec<Task>> {
        match self {
            TaskSource::Markdown(source) => source.all_tasks(),
            TaskSource::Yaml(source) => source.all_tasks(),
            TaskSource::GitHub(source) => source.all_tasks().await,
        }
    }

    /// First incomplete task, if any
    pub async fn next_task(&self) -> Result<Option<Task>> {
        Ok(self.all_tasks().await?.into_iter().next())
    }

    /// Mark a task complete. Marking the same id twice is a no-op.
    pub async fn mark_complete(&self, id: &str) -> Result<()> {
        match self {
            TaskSource::Markdown(source) => source.mark_complete(id),
            TaskSource::Yaml(source) => source.mark_complete(id),
            TaskSource::GitHub(source) => source.mark_complete(id).await,
        }
    }

    /// Count incomplete tasks
    pub async fn count_remaining(&self) -> Result<usize> {
        match self {
            TaskSource::Markdown(source) => source.count_remaining(),
            TaskSource::Yaml(source) => source.count_remaining(),
            TaskSource::GitHub(source) => source.count_remaining().await,
        }
    }

    /// Count completed tasks
    pub async fn count_completed(&self) -> Result<usize> {
        match self {
            TaskSource::Markdown(source) => source.count_completed(),
            TaskSource::Yaml(source) => source.count_completed(),
            TaskSource::GitHub(source) => source.count_completed().await,
        }
    }

    /// Whether this source carries explicit parallel grouping
    pub fn supports_groups(&self) -> bool {
        matches!(self, TaskSource::Yaml(_))
    }

    /// Incomplete tasks in a parallel group (grouping sources only)
    pub async fn tasks_in_group(&self, group: u32) -> Result<Vec<Task>> {
        match self {
            TaskSource::Yaml(source) => source.tasks_in_group(group),
            _ => Ok(Vec::new()),
        }
    }

    /// Parallel group of the task with the given title; 0 when ungrouped
    pub async fn parallel_group(&self, title: &str) -> Result<u32> {
        match self {
            TaskSource::Yaml(source) => source.parallel_group(title),
            _ => Ok(0),
        }
    }
}
