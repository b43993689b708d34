// AI-assisted merge conflict resolution

use std::path::Path;

use crate::engines::AgentEngine;
use crate::git::merge::{complete_merge, conflicted_files};

/// Build the directive prompt for resolving a conflicted merge
fn build_conflict_resolution_prompt(conflicted: &[String], branch_name: &str) -> String {
    let file_list = conflicted
        .iter()
        .map(|f| format!("  - {}", f))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are resolving a git merge conflict. The following files have conflicts after merging branch \"{branch}\":\n\n\
         {files}\n\n\
         For each conflicted file:\n\
         1. Read the file to see the conflict markers (<<<<<<<, =======, >>>>>>>)\n\
         2. Understand what both versions are trying to do\n\
         3. Edit the file to resolve the conflict by combining both changes appropriately\n\
         4. Remove ALL conflict markers - the file should be valid code with no markers remaining\n\
         5. Make sure the resulting code is syntactically valid and logically correct\n\n\
         After resolving all conflicts in all files:\n\
         1. Run 'git add' on each resolved file to stage it\n\
         2. Run 'git commit --no-edit' to complete the merge\n\n\
         Important: Do not create new commits for individual file resolutions. Only run 'git commit --no-edit' once at the very end after ALL files are resolved and staged.",
        branch = branch_name,
        files = file_list,
    )
}

/// Attempt to resolve merge conflicts with an agent run against the
/// in-progress merge in `work_dir`.
///
/// Returns true only when no conflicts remain and the merge commit
/// exists, whether finalized here or already committed by the agent.
/// The caller aborts the merge on false.
pub async fn resolve_conflicts_with_ai(
    engine: AgentEngine,
    conflicted: &[String],
    branch_name: &str,
    work_dir: &Path,
) -> bool {
    if conflicted.is_empty() {
        return true;
    }

    log::info!(
        "[Conflicts] Attempting AI-assisted resolution for {} file(s)...",
        conflicted.len()
    );
    log::debug!("[Conflicts] Conflicted files: {}", conflicted.join(", "));

    let prompt = build_conflict_resolution_prompt(conflicted, branch_name);

    let result = match engine.execute(&prompt, work_dir).await {
        Ok(result) => result,
        Err(error) => {
            log::error!("[Conflicts] AI conflict resolution error: {}", error);
            return false;
        }
    };

    if !result.success {
        log::error!(
            "[Conflicts] AI conflict resolution failed: {}",
            result.error.as_deref().unwrap_or("Unknown error")
        );
        return false;
    }

    let remaining = match conflicted_files(work_dir) {
        Ok(remaining) => remaining,
        Err(error) => {
            log::error!("[Conflicts] Failed to re-check conflicts: {}", error);
            return false;
        }
    };
    if !remaining.is_empty() {
        log::error!(
            "[Conflicts] AI did not resolve all conflicts. Remaining: {}",
            remaining.join(", ")
        );
        return false;
    }

    match complete_merge(work_dir, Some(conflicted)) {
        Ok(true) => {
            log::info!("[Conflicts] AI successfully resolved merge conflicts");
            true
        }
        Ok(false) => {
            // Zero conflicts and nothing left to complete: the agent
            // already ran the final commit itself.
            log::debug!("[Conflicts] Merge appears to be already completed by the agent");
            true
        }
        Err(error) => {
            log::error!("[Conflicts] Failed to finalize merge: {}", error);
            false
        }
    }
}
