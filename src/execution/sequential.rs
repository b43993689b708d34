// Sequential task execution in the main working directory

use std::collections::HashSet;

use anyhow::Result;

use crate::config::writer::{log_task_progress, TaskStatus};
use crate::git::branch::{create_task_branch, return_to_base_branch};
use crate::git::pr::create_pull_request;

use super::prompt::{build_prompt, PromptOptions};
use super::retry::RetryOptions;
use super::{execute_with_retry, ExecutionOptions, ExecutionResult};

/// Run tasks one at a time in the main working directory, optionally on
/// a branch per task with a PR step. No worktrees or merging here.
pub async fn run_sequential(options: &ExecutionOptions) -> Result<ExecutionResult> {
    let mut result = ExecutionResult::default();
    let retry = RetryOptions {
        max_retries: options.max_retries,
        retry_delay_secs: options.retry_delay_secs,
    };

    // Dry-run never marks tasks complete, so remember what was already
    // previewed; otherwise the loop would replay the first task forever.
    let mut previewed: HashSet<String> = HashSet::new();
    let mut iteration = 0u32;

    loop {
        if options.max_iterations > 0 && iteration >= options.max_iterations {
            log::info!(
                "[Sequential] Reached max iterations ({})",
                options.max_iterations
            );
            break;
        }

        let task = if options.dry_run {
            options
                .task_source
                .all_tasks()
                .await?
                .into_iter()
                .find(|task| !previewed.contains(&task.id))
        } else {
            options.task_source.next_task().await?
        };
        let task = match task {
            Some(task) => task,
            None => {
                log::info!("[Sequential] All tasks completed!");
                break;
            }
        };

        iteration += 1;
        let remaining = options.task_source.count_remaining().await?;
        log::info!(
            "[Sequential] Task {}: {} ({} remaining)",
            iteration,
            task.title,
            remaining
        );

        if options.dry_run {
            log::info!("[Sequential] (dry run) Would execute \"{}\"", task.title);
            previewed.insert(task.id);
            continue;
        }

        let mut branch: Option<String> = None;
        if options.branch_per_task && !options.base_branch.is_empty() {
            match create_task_branch(&task.title, &options.base_branch, &options.work_dir) {
                Ok(name) => {
                    log::debug!("[Sequential] Created branch: {}", name);
                    branch = Some(name);
                }
                Err(error) => {
                    log::error!("[Sequential] Failed to create branch: {}", error);
                }
            }
        }

        let prompt = build_prompt(&PromptOptions {
            task: task.body.as_deref().unwrap_or(&task.title),
            auto_commit: options.auto_commit,
            work_dir: &options.work_dir,
        });

        let outcome =
            execute_with_retry(options.engine, &prompt, &options.work_dir, &retry).await;

        match outcome {
            Ok(ai_result) if ai_result.success => {
                log::info!("[Sequential] Task \"{}\" completed", task.title);
                result.total_input_tokens += ai_result.input_tokens;
                result.total_output_tokens += ai_result.output_tokens;

                options.task_source.mark_complete(&task.id).await?;
                log_task_progress(&task.title, TaskStatus::Completed, &options.work_dir);
                result.tasks_completed += 1;

                if options.create_pr {
                    if let Some(branch_name) = branch.as_deref() {
                        let body =
                            format!("Automated PR created by Ralphy\n\n{}", ai_result.response);
                        if let Some(url) = create_pull_request(
                            branch_name,
                            &options.base_branch,
                            &task.title,
                            &body,
                            options.draft_pr,
                            &options.work_dir,
                        )
                        .await
                        {
                            log::info!("[Sequential] PR created: {}", url);
                        }
                    }
                }
            }
            Ok(ai_result) => {
                let message = ai_result.error.as_deref().unwrap_or("Unknown error");
                log::error!("[Sequential] Task \"{}\" failed: {}", task.title, message);
                log_task_progress(&task.title, TaskStatus::Failed, &options.work_dir);
                result.tasks_failed += 1;
            }
            Err(error) => {
                log::error!("[Sequential] Task \"{}\" failed: {}", task.title, error);
                log_task_progress(&task.title, TaskStatus::Failed, &options.work_dir);
                result.tasks_failed += 1;
            }
        }

        if options.branch_per_task && !options.base_branch.is_empty() {
            return_to_base_branch(&options.base_branch, &options.work_dir);
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::AgentEngine;
    use crate::tasks::{MarkdownTaskSource, TaskSource};
    use std::fs;
    use tempfile::TempDir;

    fn dry_run_options(temp: &TempDir, tasks: &str) -> ExecutionOptions {
        let prd = temp.path().join("PRD.md");
        fs::write(&prd, tasks).unwrap();

        ExecutionOptions {
            engine: AgentEngine::Claude,
            task_source: TaskSource::Markdown(MarkdownTaskSource::new(prd)),
            work_dir: temp.path().to_path_buf(),
            dry_run: true,
            max_iterations: 0,
            max_retries: 3,
            retry_delay_secs: 0,
            branch_per_task: false,
            base_branch: String::new(),
            create_pr: false,
            draft_pr: false,
            auto_commit: true,
            max_parallel: 3,
            backlog_file: Some("PRD.md".to_string()),
            skip_merge: false,
        }
    }

    #[tokio::test]
    async fn test_dry_run_terminates_without_completing_tasks() {
        let temp = TempDir::new().unwrap();
        let options = dry_run_options(&temp, "- [ ] First\n- [ ] Second\n- [ ] Third\n");

        let result = run_sequential(&options).await.unwrap();

        assert_eq!(result.tasks_completed, 0);
        assert_eq!(result.tasks_failed, 0);
        assert_eq!(result.total_input_tokens, 0);
        // The backlog is untouched.
        assert_eq!(options.task_source.count_remaining().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_dry_run_respects_iteration_cap() {
        let temp = TempDir::new().unwrap();
        let mut options = dry_run_options(&temp, "- [ ] A\n- [ ] B\n- [ ] C\n");
        options.max_iterations = 2;

        let result = run_sequential(&options).await.unwrap();
        assert_eq!(result, ExecutionResult::default());
    }

    #[tokio::test]
    async fn test_empty_backlog_finishes_immediately() {
        let temp = TempDir::new().unwrap();
        let mut options = dry_run_options(&temp, "- [x] Done already\n");
        options.dry_run = false;

        let result = run_sequential(&options).await.unwrap();
        assert_eq!(result, ExecutionResult::default());
    }
}
