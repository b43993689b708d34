// Task execution orchestration

pub mod conflict;
pub mod parallel;
pub mod prompt;
pub mod retry;
pub mod sequential;

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::engines::{AIResult, AgentEngine};
use crate::tasks::TaskSource;

pub use parallel::run_parallel;
pub use retry::{is_retryable_error, with_retry, RetryOptions};
pub use sequential::run_sequential;

/// Options shared by the execution modes
pub struct ExecutionOptions {
    pub engine: AgentEngine,
    pub task_source: TaskSource,
    pub work_dir: PathBuf,
    pub dry_run: bool,
    /// Maximum batches/tasks processed (0 = unlimited)
    pub max_iterations: u32,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub branch_per_task: bool,
    pub base_branch: String,
    pub create_pr: bool,
    pub draft_pr: bool,
    pub auto_commit: bool,
    pub max_parallel: usize,
    /// Backlog file name for file-backed sources; copied into agent
    /// worktrees so agents see the same context as the main checkout
    pub backlog_file: Option<String>,
    pub skip_merge: bool,
}

/// Aggregate counters surfaced to the caller at the end of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
}

/// Execute a prompt through the retry policy.
///
/// An engine-reported failure is converted into a retryable error only
/// when its diagnostic classifies as transient; any other failed result
/// is returned to the caller as-is, with no retry.
pub async fn execute_with_retry(
    engine: AgentEngine,
    prompt: &str,
    work_dir: &Path,
    options: &RetryOptions,
) -> Result<AIResult> {
    let prompt = prompt.to_string();
    let work_dir = work_dir.to_path_buf();

    with_retry(
        || {
            let prompt = prompt.clone();
            let work_dir = work_dir.clone();
            async move {
                let result = engine.execute(&prompt, &work_dir).await?;
                if !result.success {
                    if let Some(error) = result.error.as_deref() {
                        if is_retryable_error(error) {
                            anyhow::bail!("{}", error);
                        }
                    }
                }
                Ok(result)
            }
        },
        options,
        None::<fn(u32, &str)>,
    )
    .await
}
