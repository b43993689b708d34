// Ralphy CLI entry point

use std::path::Path;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;

use ralphy::config::writer::{self, TaskStatus};
use ralphy::engines::AgentEngine;
use ralphy::execution::prompt::{build_prompt, PromptOptions};
use ralphy::execution::{
    execute_with_retry, run_parallel, run_sequential, ExecutionOptions, ExecutionResult,
    RetryOptions,
};
use ralphy::git::branch::default_base_branch;
use ralphy::git::pr::is_gh_available;
use ralphy::git::worktree::cleanup_all_worktrees;
use ralphy::tasks::{GitHubTaskSource, MarkdownTaskSource, TaskSource, YamlTaskSource};

/// Autonomous AI Coding Loop - Supports Claude Code, OpenCode, Codex,
/// Cursor, Qwen-Code and Factory Droid
#[derive(Parser, Debug)]
#[command(name = "ralphy")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Single task to execute (brownfield mode)
    task: Option<String>,

    /// Initialize .ralphy/ configuration
    #[arg(long)]
    init: bool,

    /// Show current configuration
    #[arg(long)]
    config: bool,

    /// Add a rule to config
    #[arg(long, value_name = "RULE")]
    add_rule: Option<String>,

    /// Use Claude Code (default)
    #[arg(long)]
    claude: bool,

    /// Use OpenCode
    #[arg(long)]
    opencode: bool,

    /// Use Cursor Agent
    #[arg(long)]
    cursor: bool,

    /// Use Codex
    #[arg(long)]
    codex: bool,

    /// Use Qwen-Code
    #[arg(long)]
    qwen: bool,

    /// Use Factory Droid
    #[arg(long)]
    droid: bool,

    /// Show what would be done without executing
    #[arg(long)]
    dry_run: bool,

    /// Maximum iterations (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    max_iterations: u32,

    /// Maximum retries per task
    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    /// Delay between retries in seconds
    #[arg(long, default_value_t = 5)]
    retry_delay: u64,

    /// Run tasks in parallel using worktrees
    #[arg(long)]
    parallel: bool,

    /// Maximum parallel agents
    #[arg(long, default_value_t = 3)]
    max_parallel: usize,

    /// Skip the merge phase after a parallel run
    #[arg(long)]
    skip_merge: bool,

    /// Create a branch for each task
    #[arg(long)]
    branch_per_task: bool,

    /// Base branch for branches and PRs
    #[arg(long, default_value = "")]
    base_branch: String,

    /// Create pull request after each task
    #[arg(long)]
    create_pr: bool,

    /// Create PRs as draft
    #[arg(long)]
    draft_pr: bool,

    /// PRD file (markdown)
    #[arg(long, default_value = "PRD.md", value_name = "FILE")]
    prd: String,

    /// YAML task file
    #[arg(long, value_name = "FILE")]
    yaml: Option<String>,

    /// GitHub repo for issues (owner/repo)
    #[arg(long, value_name = "REPO")]
    github: Option<String>,

    /// Filter GitHub issues by label
    #[arg(long, value_name = "LABEL")]
    github_label: Option<String>,

    /// Don't auto-commit changes
    #[arg(long)]
    no_commit: bool,

    /// Remove all ralphy-managed worktrees and exit
    #[arg(long)]
    cleanup_worktrees: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn engine(&self) -> AgentEngine {
        if self.opencode {
            AgentEngine::Opencode
        } else if self.cursor {
            AgentEngine::Cursor
        } else if self.codex {
            AgentEngine::Codex
        } else if self.qwen {
            AgentEngine::Qwen
        } else if self.droid {
            AgentEngine::Droid
        } else {
            AgentEngine::Claude
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Verbosity is fixed at logger construction, not via a mutable
    // global; RUST_LOG still overrides.
    env_logger::Builder::from_env(
        env_logger::Env::default()
            .default_filter_or(if cli.verbose { "debug" } else { "info" }),
    )
    .format_timestamp(None)
    .init();

    let work_dir = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(error) => {
            log::error!("Failed to resolve working directory: {}", error);
            return ExitCode::FAILURE;
        }
    };

    if cli.init {
        return match writer::init_config(&work_dir) {
            Ok(()) => {
                log::info!("Initialized .ralphy/ configuration");
                ExitCode::SUCCESS
            }
            Err(error) => {
                log::error!("{:#}", error);
                ExitCode::FAILURE
            }
        };
    }

    if cli.config {
        let config = ralphy::config::load_config(&work_dir).unwrap_or_default();
        return match serde_yaml::to_string(&config) {
            Ok(text) => {
                println!("{}", text);
                ExitCode::SUCCESS
            }
            Err(error) => {
                log::error!("{}", error);
                ExitCode::FAILURE
            }
        };
    }

    if let Some(rule) = cli.add_rule.as_deref() {
        return match writer::add_rule(rule, &work_dir) {
            Ok(()) => {
                log::info!("Rule added");
                ExitCode::SUCCESS
            }
            Err(error) => {
                log::error!("{:#}", error);
                ExitCode::FAILURE
            }
        };
    }

    if cli.cleanup_worktrees {
        return match cleanup_all_worktrees(&work_dir) {
            Ok(removed) => {
                log::info!("Removed {} worktree(s)", removed);
                ExitCode::SUCCESS
            }
            Err(error) => {
                log::error!("{:#}", error);
                ExitCode::FAILURE
            }
        };
    }

    // A missing engine CLI fails the whole run before any batch work.
    let engine = cli.engine();
    if !engine.is_available() {
        log::error!(
            "{} CLI not found. Make sure '{}' is in your PATH.",
            engine.name(),
            engine.cli_command()
        );
        return ExitCode::FAILURE;
    }

    if let Some(task) = cli.task.clone() {
        return run_single_task(&task, &cli, engine, &work_dir).await;
    }

    run_loop(&cli, engine, &work_dir).await
}

/// Run the backlog loop (multiple tasks from file or GitHub)
async fn run_loop(cli: &Cli, engine: AgentEngine, work_dir: &Path) -> ExitCode {
    let start = Instant::now();

    let (task_source, backlog_file) = if let Some(repo) = cli.github.as_deref() {
        match GitHubTaskSource::new(repo, cli.github_label.clone()) {
            Ok(source) => (TaskSource::GitHub(source), None),
            Err(error) => {
                log::error!("{:#}", error);
                return ExitCode::FAILURE;
            }
        }
    } else if let Some(file) = cli.yaml.as_deref() {
        if !work_dir.join(file).exists() {
            log::error!("{} not found in current directory", file);
            return ExitCode::FAILURE;
        }
        (
            TaskSource::Yaml(YamlTaskSource::new(work_dir.join(file))),
            Some(file.to_string()),
        )
    } else {
        if !work_dir.join(&cli.prd).exists() {
            log::error!("{} not found in current directory", cli.prd);
            log::info!(
                "Create a {} file with tasks, or point at a backlog with --yaml/--github",
                cli.prd
            );
            return ExitCode::FAILURE;
        }
        (
            TaskSource::Markdown(MarkdownTaskSource::new(work_dir.join(&cli.prd))),
            Some(cli.prd.clone()),
        )
    };

    let remaining = match task_source.count_remaining().await {
        Ok(count) => count,
        Err(error) => {
            log::error!("{:#}", error);
            return ExitCode::FAILURE;
        }
    };
    if remaining == 0 {
        log::info!("No tasks remaining. All done!");
        return ExitCode::SUCCESS;
    }

    let mut base_branch = cli.base_branch.clone();
    if (cli.branch_per_task || cli.parallel || cli.create_pr) && base_branch.is_empty() {
        base_branch = match default_base_branch(work_dir) {
            Ok(branch) => branch,
            Err(error) => {
                log::error!("Failed to resolve base branch: {:#}", error);
                return ExitCode::FAILURE;
            }
        };
    }

    if cli.create_pr && !is_gh_available().await {
        log::warn!("gh CLI not found or not authenticated; PR creation will be skipped");
    }

    log::info!("Starting Ralphy with {}", engine.name());
    log::info!("Tasks remaining: {}", remaining);
    if cli.parallel {
        log::info!("Mode: Parallel (max {} agents)", cli.max_parallel);
    } else {
        log::info!("Mode: Sequential");
    }

    let options = ExecutionOptions {
        engine,
        task_source,
        work_dir: work_dir.to_path_buf(),
        dry_run: cli.dry_run,
        max_iterations: cli.max_iterations,
        max_retries: cli.max_retries,
        retry_delay_secs: cli.retry_delay,
        branch_per_task: cli.branch_per_task,
        base_branch,
        create_pr: cli.create_pr,
        draft_pr: cli.draft_pr,
        auto_commit: !cli.no_commit,
        max_parallel: cli.max_parallel,
        backlog_file,
        skip_merge: cli.skip_merge,
    };

    let outcome = if cli.parallel {
        run_parallel(&options).await
    } else {
        run_sequential(&options).await
    };

    let result = match outcome {
        Ok(result) => result,
        Err(error) => {
            log::error!("Run failed: {:#}", error);
            return ExitCode::FAILURE;
        }
    };

    print_summary(&result, start.elapsed());

    if result.tasks_failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Run a single ad-hoc task (brownfield mode)
async fn run_single_task(task: &str, cli: &Cli, engine: AgentEngine, work_dir: &Path) -> ExitCode {
    log::info!("Running task with {}...", engine.name());

    let prompt = build_prompt(&PromptOptions {
        task,
        auto_commit: !cli.no_commit,
        work_dir,
    });

    if cli.dry_run {
        log::info!("(dry run) Would execute task");
        println!("\nPrompt:\n{}", prompt);
        return ExitCode::SUCCESS;
    }

    let retry = RetryOptions {
        max_retries: cli.max_retries,
        retry_delay_secs: cli.retry_delay,
    };

    match execute_with_retry(engine, &prompt, work_dir, &retry).await {
        Ok(result) if result.success => {
            writer::log_task_progress(task, TaskStatus::Completed, work_dir);
            if !result.response.is_empty() && result.response != "Task completed" {
                println!("\nResult:\n{}", truncate_response(&result.response));
            }
            ExitCode::SUCCESS
        }
        Ok(result) => {
            log::error!("{}", result.error.as_deref().unwrap_or("Unknown error"));
            writer::log_task_progress(task, TaskStatus::Failed, work_dir);
            ExitCode::FAILURE
        }
        Err(error) => {
            log::error!("{}", error);
            writer::log_task_progress(task, TaskStatus::Failed, work_dir);
            ExitCode::FAILURE
        }
    }
}

fn truncate_response(response: &str) -> String {
    const LIMIT: usize = 500;
    if response.chars().count() <= LIMIT {
        response.to_string()
    } else {
        let head: String = response.chars().take(LIMIT).collect();
        format!("{}...", head)
    }
}

fn print_summary(result: &ExecutionResult, elapsed: Duration) {
    println!();
    println!("{}", "=".repeat(50));
    println!("Summary:");
    println!("  Completed: {}", result.tasks_completed);
    println!("  Failed:    {}", result.tasks_failed);
    println!("  Duration:  {}", format_duration(elapsed));
    if result.total_input_tokens > 0 || result.total_output_tokens > 0 {
        println!(
            "  Tokens:    {} in / {} out",
            result.total_input_tokens, result.total_output_tokens
        );
    }
    println!("{}", "=".repeat(50));
}

fn format_duration(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    if secs == 0 {
        return format!("{}ms", elapsed.as_millis());
    }
    let mins = secs / 60;
    if mins == 0 {
        return format!("{}s", secs);
    }
    format!("{}m {}s", mins, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_default_engine_is_claude() {
        let cli = parse(&["ralphy"]);
        assert_eq!(cli.engine(), AgentEngine::Claude);
    }

    #[test]
    fn test_engine_flags() {
        assert_eq!(parse(&["ralphy", "--opencode"]).engine(), AgentEngine::Opencode);
        assert_eq!(parse(&["ralphy", "--cursor"]).engine(), AgentEngine::Cursor);
        assert_eq!(parse(&["ralphy", "--codex"]).engine(), AgentEngine::Codex);
        assert_eq!(parse(&["ralphy", "--qwen"]).engine(), AgentEngine::Qwen);
        assert_eq!(parse(&["ralphy", "--droid"]).engine(), AgentEngine::Droid);
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&["ralphy"]);
        assert_eq!(cli.max_iterations, 0);
        assert_eq!(cli.max_retries, 3);
        assert_eq!(cli.retry_delay, 5);
        assert_eq!(cli.max_parallel, 3);
        assert_eq!(cli.prd, "PRD.md");
        assert!(!cli.parallel);
        assert!(!cli.dry_run);
    }

    #[test]
    fn test_parallel_options() {
        let cli = parse(&["ralphy", "--parallel", "--max-parallel", "5", "--yaml", "tasks.yaml"]);
        assert!(cli.parallel);
        assert_eq!(cli.max_parallel, 5);
        assert_eq!(cli.yaml.as_deref(), Some("tasks.yaml"));
    }

    #[test]
    fn test_single_task_argument() {
        let cli = parse(&["ralphy", "fix the login page"]);
        assert_eq!(cli.task.as_deref(), Some("fix the login page"));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
    }
}
