// Prompt assembly for task execution

use std::path::Path;

use crate::config::loader::{load_boundaries, load_project_context, load_rules, PROGRESS_FILE};

/// Options for the sequential/single-task prompt
pub struct PromptOptions<'a> {
    pub task: &'a str,
    pub auto_commit: bool,
    pub work_dir: &'a Path,
}

/// Build the full prompt with project context, rules, boundaries and task
pub fn build_prompt(options: &PromptOptions) -> String {
    let mut parts = Vec::new();

    let context = load_project_context(options.work_dir);
    if !context.is_empty() {
        parts.push(format!("## Project Context\n{}", context));
    }

    let rules = load_rules(options.work_dir);
    if !rules.is_empty() {
        parts.push(format!(
            "## Rules (you MUST follow these)\n{}",
            rules.join("\n")
        ));
    }

    let boundaries = load_boundaries(options.work_dir);
    if !boundaries.is_empty() {
        parts.push(format!(
            "## Boundaries\nDo NOT modify these files/directories:\n{}",
            boundaries.join("\n")
        ));
    }

    parts.push(format!("## Task\n{}", options.task));

    let mut instructions = vec![
        "1. Implement the task described above",
        "2. Write tests if appropriate",
        "3. Ensure the code works correctly",
    ];
    if options.auto_commit {
        instructions.push("4. Commit your changes with a descriptive message");
    }
    parts.push(format!("## Instructions\n{}", instructions.join("\n")));

    parts.push("Keep changes focused and minimal. Do not refactor unrelated code.".to_string());

    parts.join("\n\n")
}

/// Build the prompt for one parallel agent working inside its worktree
pub fn build_parallel_prompt(task: &str, backlog_file: &str) -> String {
    format!(
        "You are working on a specific task. Focus ONLY on this task:\n\n\
         TASK: {task}\n\n\
         Instructions:\n\
         1. Implement this specific task completely\n\
         2. Write tests if appropriate\n\
         3. Update {progress} with what you did\n\
         4. Commit your changes with a descriptive message\n\n\
         Do NOT modify {backlog} or mark tasks complete - that will be handled separately.\n\
         Focus only on implementing: {task}",
        task = task,
        progress = PROGRESS_FILE,
        backlog = backlog_file,
    )
}
