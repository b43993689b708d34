// Markdown checkbox task source

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;

use super::Task;

/// Tasks read from a markdown file with checkbox lines.
/// `- [ ] title` is incomplete, `- [x] title` is complete; the 1-based
/// line number serves as the task id. Completion is tracked by rewriting
/// the checkbox in place.
pub struct MarkdownTaskSource {
    file_path: PathBuf,
}

impl MarkdownTaskSource {
    pub fn new(file_path: impl AsRef<Path>) -> Self {
        Self {
            file_path: file_path.as_ref().to_path_buf(),
        }
    }

    fn read(&self) -> Result<String> {
        fs::read_to_string(&self.file_path)
            .with_context(|| format!("failed to read {}", self.file_path.display()))
    }

    /// All incomplete tasks in document order
    pub fn all_tasks(&self) -> Result<Vec<Task>> {
        let content = self.read()?;
        let incomplete = incomplete_pattern();

        let mut tasks = Vec::new();
        for (index, line) in content.lines().enumerate() {
            if let Some(caps) = incomplete.captures(line) {
                tasks.push(Task {
                    id: (index + 1).to_string(),
                    title: caps[1].trim().to_string(),
                    body: None,
                    parallel_group: None,
                    completed: false,
                });
            }
        }

        Ok(tasks)
    }

    /// Tick the checkbox on the task's line. Already-ticked lines are
    /// left untouched, so marking twice is a no-op.
    pub fn mark_complete(&self, id: &str) -> Result<()> {
        let line_number: usize = id
            .parse()
            .with_context(|| format!("invalid markdown task id: {}", id))?;

        let content = self.read()?;
        let mut lines: Vec<String> = content.lines().map(str::to_string).collect();

        if line_number >= 1 && line_number <= lines.len() {
            let line = &lines[line_number - 1];
            if let Some(rest) = line.strip_prefix("- [ ] ") {
                lines[line_number - 1] = format!("- [x] {}", rest);
                let mut output = lines.join("\n");
                if content.ends_with('\n') {
                    output.push('\n');
                }
                fs::write(&self.file_path, output)
                    .with_context(|| format!("failed to write {}", self.file_path.display()))?;
            }
        }

        Ok(())
    }

    pub fn count_remaining(&self) -> Result<usize> {
        let content = self.read()?;
        let incomplete = incomplete_pattern();
        Ok(content.lines().filter(|l| incomplete.is_match(l)).count())
    }

    pub fn count_completed(&self) -> Result<usize> {
        let content = self.read()?;
        let completed = Regex::new(r"^- \[[xX]\] ").unwrap();
        Ok(content.lines().filter(|l| completed.is_match(l)).count())
    }
}

fn incomplete_pattern() -> Regex {
    Regex::new(r"^- \[ \] (.+)$").unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_source(content: &str) -> (TempDir, MarkdownTaskSource) {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("PRD.md");
        fs::write(&path, content).unwrap();
        (temp, MarkdownTaskSource::new(path))
    }

    #[test]
    fn test_all_tasks_uses_line_numbers_as_ids() {
        let (_temp, source) = write_source("# Tasks\n- [ ] First task\n- [x] Done task\n- [ ] Second task\n");

        let tasks = source.all_tasks().unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].id, "2");
        assert_eq!(tasks[0].title, "First task");
        assert_eq!(tasks[1].id, "4");
        assert_eq!(tasks[1].title, "Second task");
    }

    #[test]
    fn test_counts() {
        let (_temp, source) = write_source("- [ ] A\n- [x] B\n");
        assert_eq!(source.count_remaining().unwrap(), 1);
        assert_eq!(source.count_completed().unwrap(), 1);
    }

    #[test]
    fn test_mark_complete_rewrites_checkbox() {
        let (_temp, source) = write_source("- [ ] A\n- [x] B\n");

        source.mark_complete("1").unwrap();
        assert_eq!(source.count_remaining().unwrap(), 0);
        assert_eq!(source.count_completed().unwrap(), 2);
    }

    #[test]
    fn test_mark_complete_is_idempotent() {
        let (_temp, source) = write_source("- [ ] A\n- [ ] B\n");

        source.mark_complete("1").unwrap();
        let after_first = source.count_remaining().unwrap();
        source.mark_complete("1").unwrap();
        let after_second = source.count_remaining().unwrap();

        assert_eq!(after_first, 1);
        assert_eq!(after_second, 1);
        assert_eq!(source.count_completed().unwrap(), 1);
    }

    #[test]
    fn test_mark_complete_out_of_range_is_a_no_op() {
        let (_temp, source) = write_source("- [ ] A\n");
        source.mark_complete("99").unwrap();
        assert_eq!(source.count_remaining().unwrap(), 1);
    }

    #[test]
    fn test_mark_complete_rejects_non_numeric_id() {
        let (_temp, source) = write_source("- [ ] A\n");
        assert!(source.mark_complete("not-a-number").is_err());
    }

    #[test]
    fn test_non_checkbox_lines_are_ignored() {
        let (_temp, source) = write_source("# Heading\nSome prose.\n  - [ ] indented is not a task\n- [ ] Real task\n");

        let tasks = source.all_tasks().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "Real task");
    }
}
