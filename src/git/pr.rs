// Pull request plumbing via git push and the gh CLI

use std::path::Path;

use crate::engines::exec::exec_command;

/// Push a branch to origin with upstream tracking
pub async fn push_branch(branch: &str, work_dir: &Path) -> bool {
    match exec_command(
        "git",
        &["push", "--set-upstream", "origin", branch],
        work_dir,
    )
    .await
    {
        Ok(output) if output.exit_code == 0 => true,
        Ok(output) => {
            log::warn!("[PR] git push failed: {}", output.stderr.trim());
            false
        }
        Err(error) => {
            log::warn!("[PR] git push failed: {}", error);
            false
        }
    }
}

/// Create a pull request with the gh CLI; returns the PR URL.
/// Best effort: failures are logged and reported as None, they never
/// affect task completion accounting.
pub async fn create_pull_request(
    branch: &str,
    base_branch: &str,
    title: &str,
    body: &str,
    draft: bool,
    work_dir: &Path,
) -> Option<String> {
    if !push_branch(branch, work_dir).await {
        return None;
    }

    let mut args = vec![
        "pr", "create", "--base", base_branch, "--head", branch, "--title", title, "--body", body,
    ];
    if draft {
        args.push("--draft");
    }

    match exec_command("gh", &args, work_dir).await {
        Ok(output) if output.exit_code == 0 => {
            let url = output.stdout.trim().to_string();
            (!url.is_empty()).then_some(url)
        }
        Ok(output) => {
            log::warn!("[PR] gh pr create failed: {}", output.stderr.trim());
            None
        }
        Err(error) => {
            log::warn!("[PR] gh pr create failed: {}", error);
            None
        }
    }
}

/// Check if the gh CLI is available and authenticated
pub async fn is_gh_available() -> bool {
    match exec_command("gh", &["auth", "status"], Path::new(".")).await {
        Ok(output) => output.exit_code == 0,
        Err(_) => false,
    }
}
