// Parallel task execution with per-agent worktree isolation

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use crate::config::loader::RALPHY_DIR;
use crate::config::writer::{log_task_progress, TaskStatus};
use crate::engines::{AIResult, AgentEngine};
use crate::git::branch::{current_branch, delete_local_branch, return_to_base_branch};
use crate::git::merge::{abort_merge, merge_agent_branch};
use crate::git::worktree::{cleanup_agent_worktree, create_agent_worktree, worktree_base};
use crate::tasks::{Task, TaskSource};

use super::conflict::resolve_conflicts_with_ai;
use super::prompt::build_parallel_prompt;
use super::retry::RetryOptions;
use super::{execute_with_retry, ExecutionOptions, ExecutionResult};

/// Outcome of one agent attempt inside its worktree. Owned by the
/// orchestrator for the duration of one task's processing.
struct AgentRun {
    task: Task,
    agent_num: u64,
    worktree_dir: Option<PathBuf>,
    branch_name: Option<String>,
    result: Option<AIResult>,
    error: Option<String>,
}

/// Run tasks in parallel batches, one isolated worktree per agent, then
/// reconcile every completed branch into the target branch.
pub async fn run_parallel(options: &ExecutionOptions) -> Result<ExecutionResult> {
    let mut result = ExecutionResult::default();
    let retry = RetryOptions {
        max_retries: options.max_retries,
        retry_delay_secs: options.retry_delay_secs,
    };

    let worktree_root = worktree_base(&options.work_dir)?;
    log::debug!("[Parallel] Worktree base: {}", worktree_root.display());

    // Restored after the merge phase.
    let starting_branch = current_branch(&options.work_dir)?;
    let target_branch = if options.base_branch.is_empty() {
        starting_branch.clone()
    } else {
        options.base_branch.clone()
    };

    // (branch, agent number) for every successfully completed task,
    // accumulated across all batches and merged once after the loop.
    let mut completed_branches: Vec<(String, u64)> = Vec::new();
    // Dry-run never marks tasks complete; remember what was previewed so
    // the loop terminates once every pending task was shown.
    let mut previewed: HashSet<String> = HashSet::new();
    // Globally monotonic across batches; never reused within a run, so
    // branch and directory names cannot collide.
    let mut agent_num: u64 = 0;
    let mut iteration = 0u32;

    loop {
        if options.max_iterations > 0 && iteration >= options.max_iterations {
            log::info!("[Parallel] Reached max iterations ({})", options.max_iterations);
            break;
        }

        let candidates = if options.dry_run {
            let mut tasks = options.task_source.all_tasks().await?;
            tasks.retain(|task| !previewed.contains(&task.id));
            tasks
        } else {
            select_candidates(&options.task_source).await?
        };

        if candidates.is_empty() {
            log::info!("[Parallel] All tasks completed!");
            break;
        }

        let batch: Vec<Task> = candidates
            .into_iter()
            .take(options.max_parallel)
            .collect();
        iteration += 1;

        log::info!("[Parallel] Batch {}: {} task(s) in parallel", iteration, batch.len());

        if options.dry_run {
            for task in &batch {
                log::info!("[Parallel] (dry run) Would dispatch \"{}\"", task.title);
                previewed.insert(task.id.clone());
            }
            continue;
        }

        let mut handles = Vec::with_capacity(batch.len());
        for task in batch {
            agent_num += 1;
            handles.push(tokio::spawn(run_agent_in_worktree(
                options.engine,
                task,
                agent_num,
                target_branch.clone(),
                worktree_root.clone(),
                options.work_dir.clone(),
                options.backlog_file.clone(),
                retry.clone(),
            )));
        }

        // The batch is a synchronization barrier: every worker finishes
        // before any result is recorded. A straggler cannot be merged
        // early.
        let mut runs = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(run) => runs.push(run),
                Err(error) => log::error!("[Parallel] Agent task panicked: {}", error),
            }
        }

        for run in runs {
            process_agent_run(run, options, &mut result, &mut completed_branches).await?;
        }
    }

    if !options.skip_merge && !options.dry_run && !completed_branches.is_empty() {
        merge_completed_branches(
            &mut completed_branches,
            &target_branch,
            options.engine,
            &options.work_dir,
        )
        .await;

        let now = current_branch(&options.work_dir)?;
        if now != starting_branch {
            log::debug!("[Parallel] Restoring starting branch: {}", starting_branch);
            return_to_base_branch(&starting_branch, &options.work_dir);
        }
    }

    Ok(result)
}

/// Candidate tasks for the next batch: the whole parallel group of the
/// next task when the source supports grouping (group 0 stays solo),
/// otherwise everything still pending.
async fn select_candidates(source: &TaskSource) -> Result<Vec<Task>> {
    if source.supports_groups() {
        let next = match source.next_task().await? {
            Some(task) => task,
            None => return Ok(Vec::new()),
        };
        let group = source.parallel_group(&next.title).await?;
        if group > 0 {
            return source.tasks_in_group(group).await;
        }
        return Ok(vec![next]);
    }
    source.all_tasks().await
}

/// One agent slot: create the worktree, seed it, run the engine through
/// the retry policy. Never touches shared state; git work happens on the
/// blocking pool with a repository handle of its own.
#[allow(clippy::too_many_arguments)]
async fn run_agent_in_worktree(
    engine: AgentEngine,
    task: Task,
    agent_num: u64,
    base_branch: String,
    worktree_root: PathBuf,
    main_dir: PathBuf,
    backlog_file: Option<String>,
    retry: RetryOptions,
) -> AgentRun {
    let created = {
        let title = task.title.clone();
        let base = base_branch.clone();
        let root = worktree_root.clone();
        let dir = main_dir.clone();
        tokio::task::spawn_blocking(move || {
            create_agent_worktree(&title, agent_num, &base, &root, &dir)
        })
        .await
        .map_err(|error| anyhow!("worktree setup panicked: {}", error))
        .and_then(|result| result)
    };

    let worktree = match created {
        Ok(worktree) => worktree,
        Err(error) => {
            // Only this agent's task fails; the rest of the batch is
            // unaffected.
            return AgentRun {
                task,
                agent_num,
                worktree_dir: None,
                branch_name: None,
                result: None,
                error: Some(format!("{:#}", error)),
            };
        }
    };

    log::debug!(
        "[Parallel] Agent {}: created worktree at {}",
        agent_num,
        worktree.worktree_dir.display()
    );

    if let Err(error) = seed_worktree(&main_dir, &worktree.worktree_dir, backlog_file.as_deref()) {
        log::warn!("[Parallel] Agent {}: failed to seed worktree: {}", agent_num, error);
    }

    let prompt = build_parallel_prompt(
        &task.title,
        backlog_file.as_deref().unwrap_or("the task backlog"),
    );

    match execute_with_retry(engine, &prompt, &worktree.worktree_dir, &retry).await {
        Ok(result) => AgentRun {
            task,
            agent_num,
            worktree_dir: Some(worktree.worktree_dir),
            branch_name: Some(worktree.branch_name),
            result: Some(result),
            error: None,
        },
        Err(error) => AgentRun {
            task,
            agent_num,
            worktree_dir: Some(worktree.worktree_dir),
            branch_name: Some(worktree.branch_name),
            result: None,
            error: Some(format!("{:#}", error)),
        },
    }
}

/// Copy the backlog file into the worktree and make sure .ralphy/
/// exists there, so the agent sees the same context as the main checkout
fn seed_worktree(main_dir: &Path, worktree_dir: &Path, backlog_file: Option<&str>) -> Result<()> {
    if let Some(file) = backlog_file {
        let src = main_dir.join(file);
        if src.exists() {
            std::fs::copy(&src, worktree_dir.join(file))
                .with_context(|| format!("failed to copy {} into worktree", file))?;
        }
    }

    let ralphy_dir = worktree_dir.join(RALPHY_DIR);
    if !ralphy_dir.exists() {
        std::fs::create_dir_all(&ralphy_dir)?;
    }
    Ok(())
}

/// Record one finished agent: counters, backlog completion, progress
/// log, branch bookkeeping, worktree cleanup
async fn process_agent_run(
    run: AgentRun,
    options: &ExecutionOptions,
    result: &mut ExecutionResult,
    completed_branches: &mut Vec<(String, u64)>,
) -> Result<()> {
    let AgentRun {
        task,
        agent_num,
        worktree_dir,
        branch_name,
        result: ai_result,
        error,
    } = run;

    if let Some(error) = error {
        log::error!("[Parallel] Task \"{}\" failed: {}", task.title, error);
        log_task_progress(&task.title, TaskStatus::Failed, &options.work_dir);
        result.tasks_failed += 1;
    } else if let Some(ai_result) = ai_result {
        if ai_result.success {
            log::info!("[Parallel] Task \"{}\" completed", task.title);
            result.total_input_tokens += ai_result.input_tokens;
            result.total_output_tokens += ai_result.output_tokens;

            options.task_source.mark_complete(&task.id).await?;
            log_task_progress(&task.title, TaskStatus::Completed, &options.work_dir);
            result.tasks_completed += 1;

            if let Some(branch) = branch_name.clone() {
                completed_branches.push((branch, agent_num));
            }
        } else {
            let message = ai_result.error.as_deref().unwrap_or("Unknown error");
            log::error!("[Parallel] Task \"{}\" failed: {}", task.title, message);
            log_task_progress(&task.title, TaskStatus::Failed, &options.work_dir);
            result.tasks_failed += 1;
        }
    }

    if let Some(worktree_dir) = worktree_dir {
        let display = worktree_dir.display().to_string();
        let branch = branch_name.unwrap_or_default();
        let main_dir = options.work_dir.clone();

        let cleanup = tokio::task::spawn_blocking(move || {
            cleanup_agent_worktree(&worktree_dir, &branch, &main_dir)
        })
        .await;

        match cleanup {
            Ok(Ok(outcome)) if outcome.left_in_place => {
                log::info!(
                    "[Parallel] Worktree left in place (uncommitted changes): {}",
                    display
                );
            }
            Ok(Ok(_)) => {}
            Ok(Err(error)) => log::warn!("[Parallel] Worktree cleanup failed: {}", error),
            Err(error) => log::warn!("[Parallel] Worktree cleanup panicked: {}", error),
        }
    }

    Ok(())
}

/// Merge completed branches into the target branch, resolving conflicts
/// with the engine where possible.
///
/// Branches merge in agent-number order, which is dispatch order: the
/// outcome never depends on which worker happened to finish first.
/// Merged branches are deleted; conflicted or failed branches are
/// preserved and reported for manual review.
async fn merge_completed_branches(
    branches: &mut Vec<(String, u64)>,
    target_branch: &str,
    engine: AgentEngine,
    work_dir: &Path,
) {
    branches.sort_by_key(|(_, agent_num)| *agent_num);

    log::info!(
        "[Merge] Merging {} branch(es) into {}",
        branches.len(),
        target_branch
    );

    let mut merged: Vec<String> = Vec::new();
    let mut failed: Vec<String> = Vec::new();

    for (branch, _) in branches.iter() {
        log::info!("[Merge] Merging {}...", branch);

        let merge_result = match merge_agent_branch(branch, target_branch, work_dir) {
            Ok(result) => result,
            Err(error) => {
                log::error!("[Merge] Failed to merge {}: {}", branch, error);
                failed.push(branch.clone());
                continue;
            }
        };

        if merge_result.success {
            log::info!("[Merge] Merged {}", branch);
            merged.push(branch.clone());
        } else if merge_result.has_conflicts {
            log::warn!("[Merge] Conflict in {}, attempting AI resolution...", branch);

            let resolved = resolve_conflicts_with_ai(
                engine,
                &merge_result.conflicted_files,
                branch,
                work_dir,
            )
            .await;

            if resolved {
                log::info!("[Merge] Resolved conflicts and merged {}", branch);
                merged.push(branch.clone());
            } else {
                log::error!("[Merge] Failed to resolve conflicts for {}", branch);
                if let Err(error) = abort_merge(work_dir) {
                    log::warn!("[Merge] Failed to abort merge: {}", error);
                }
                failed.push(branch.clone());
            }
        } else {
            // A non-conflict merge error left nothing in progress, so
            // there is nothing to abort.
            log::error!(
                "[Merge] Failed to merge {}: {}",
                branch,
                merge_result.error.as_deref().unwrap_or("Unknown error")
            );
            failed.push(branch.clone());
        }
    }

    for branch in &merged {
        if delete_local_branch(branch, work_dir) {
            log::debug!("[Merge] Deleted merged branch: {}", branch);
        }
    }

    if !merged.is_empty() {
        log::info!("[Merge] Successfully merged {} branch(es)", merged.len());
    }
    if !failed.is_empty() {
        log::warn!(
            "[Merge] Failed to merge {} branch(es): {}",
            failed.len(),
            failed.join(", ")
        );
        log::info!("[Merge] These branches have been preserved for manual review.");
    }
}
