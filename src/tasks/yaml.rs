// YAML task source with parallel groups

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::Task;

#[derive(Debug, Default, Serialize, Deserialize)]
struct YamlTaskFile {
    #[serde(default)]
    tasks: Vec<YamlTask>,
}

#[derive(Debug, Serialize, Deserialize)]
struct YamlTask {
    title: String,
    #[serde(default)]
    completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    parallel_group: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

/// Tasks read from a YAML file:
///
/// ```yaml
/// tasks:
///   - title: "Task description"
///     completed: false
///     parallel_group: 1  # optional; 0 or absent = sequential only
/// ```
///
/// The title is the task id, so titles must be unique within a file.
pub struct YamlTaskSource {
    file_path: PathBuf,
}

impl YamlTaskSource {
    pub fn new(file_path: impl AsRef<Path>) -> Self {
        Self {
            file_path: file_path.as_ref().to_path_buf(),
        }
    }

    fn read(&self) -> Result<YamlTaskFile> {
        let content = fs::read_to_string(&self.file_path)
            .with_context(|| format!("failed to read {}", self.file_path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse {}", self.file_path.display()))
    }

    fn write(&self, data: &YamlTaskFile) -> Result<()> {
        let content = serde_yaml::to_string(data)?;
        fs::write(&self.file_path, content)
            .with_context(|| format!("failed to write {}", self.file_path.display()))
    }

    /// All incomplete tasks in list order
    pub fn all_tasks(&self) -> Result<Vec<Task>> {
        let data = self.read()?;
        Ok(data
            .tasks
            .into_iter()
            .filter(|t| !t.completed)
            .map(to_task)
            .collect())
    }

    /// Flag the task as completed in the file. Unknown or already
    /// completed titles are a no-op.
    pub fn mark_complete(&self, id: &str) -> Result<()> {
        let mut data = self.read()?;
        if let Some(task) = data.tasks.iter_mut().find(|t| t.title == id) {
            if !task.completed {
                task.completed = true;
                self.write(&data)?;
            }
        }
        Ok(())
    }

    pub fn count_remaining(&self) -> Result<usize> {
        Ok(self.read()?.tasks.iter().filter(|t| !t.completed).count())
    }

    pub fn count_completed(&self) -> Result<usize> {
        Ok(self.read()?.tasks.iter().filter(|t| t.completed).count())
    }

    /// Incomplete tasks whose parallel group matches; absent groups
    /// count as group 0
    pub fn tasks_in_group(&self, group: u32) -> Result<Vec<Task>> {
        let data = self.read()?;
        Ok(data
            .tasks
            .into_iter()
            .filter(|t| !t.completed && t.parallel_group.unwrap_or(0) == group)
            .map(to_task)
            .collect())
    }

    /// Parallel group of the task with the given title; 0 when the task
    /// is unknown or ungrouped
    pub fn parallel_group(&self, title: &str) -> Result<u32> {
        let data = self.read()?;
        Ok(data
            .tasks
            .iter()
            .find(|t| t.title == title)
            .and_then(|t| t.parallel_group)
            .unwrap_or(0))
    }
}

fn to_task(task: YamlTask) -> Task {
    Task {
        id: task.title.clone(),
        title: task.title,
        body: task.description,
        parallel_group: task.parallel_group,
        completed: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"tasks:
  - title: "Add login"
    completed: false
    parallel_group: 1
    description: "Email/password login"
  - title: "Add logout"
    completed: false
    parallel_group: 1
  - title: "Migrate database"
    completed: false
    parallel_group: 0
  - title: "Old work"
    completed: true
"#;

    fn write_source(content: &str) -> (TempDir, YamlTaskSource) {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tasks.yaml");
        fs::write(&path, content).unwrap();
        (temp, YamlTaskSource::new(path))
    }

    #[test]
    fn test_all_tasks_filters_completed() {
        let (_temp, source) = write_source(SAMPLE);
        let tasks = source.all_tasks().unwrap();
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0].id, "Add login");
        assert_eq!(tasks[0].body.as_deref(), Some("Email/password login"));
        assert_eq!(tasks[0].parallel_group, Some(1));
    }

    #[test]
    fn test_counts() {
        let (_temp, source) = write_source(SAMPLE);
        assert_eq!(source.count_remaining().unwrap(), 3);
        assert_eq!(source.count_completed().unwrap(), 1);
    }

    #[test]
    fn test_tasks_in_group() {
        let (_temp, source) = write_source(SAMPLE);
        let group = source.tasks_in_group(1).unwrap();
        assert_eq!(group.len(), 2);
        assert!(group.iter().all(|t| t.parallel_group == Some(1)));
    }

    #[test]
    fn test_parallel_group_lookup() {
        let (_temp, source) = write_source(SAMPLE);
        assert_eq!(source.parallel_group("Add login").unwrap(), 1);
        assert_eq!(source.parallel_group("Migrate database").unwrap(), 0);
        assert_eq!(source.parallel_group("does not exist").unwrap(), 0);
    }

    #[test]
    fn test_mark_complete_persists() {
        let (_temp, source) = write_source(SAMPLE);
        source.mark_complete("Add login").unwrap();
        assert_eq!(source.count_remaining().unwrap(), 2);
        assert_eq!(source.count_completed().unwrap(), 2);
    }

    #[test]
    fn test_mark_complete_is_idempotent() {
        let (_temp, source) = write_source(SAMPLE);
        source.mark_complete("Add login").unwrap();
        source.mark_complete("Add login").unwrap();
        assert_eq!(source.count_remaining().unwrap(), 2);
        assert_eq!(source.count_completed().unwrap(), 2);
    }

    #[test]
    fn test_missing_tasks_key_is_empty_backlog() {
        let (_temp, source) = write_source("{}");
        assert_eq!(source.all_tasks().unwrap().len(), 0);
        assert_eq!(source.count_remaining().unwrap(), 0);
    }
}
