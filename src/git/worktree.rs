// Worktree isolation for parallel agents

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use git2::{BranchType, Repository, StatusOptions, WorktreeAddOptions, WorktreePruneOptions};

use super::branch::slugify;

/// Handle to a worktree created for one agent
#[derive(Debug, Clone)]
pub struct AgentWorktree {
    pub worktree_dir: PathBuf,
    pub branch_name: String,
}

/// Outcome of a worktree cleanup attempt
#[derive(Debug, Clone, Copy)]
pub struct CleanupOutcome {
    /// The worktree still held uncommitted changes and was not removed
    pub left_in_place: bool,
}

/// Worktree base directory under the main checkout, created lazily
pub fn worktree_base(work_dir: &Path) -> Result<PathBuf> {
    let base = work_dir.join(".ralphy-worktrees");
    if !base.exists() {
        fs::create_dir_all(&base)
            .with_context(|| format!("failed to create {}", base.display()))?;
    }
    Ok(base)
}

/// Create an isolated worktree and branch for one agent.
///
/// Agent numbers are unique for the whole run, so the derived branch and
/// directory names can only collide with leftovers of a crashed earlier
/// run; those are removed first.
pub fn create_agent_worktree(
    task_title: &str,
    agent_num: u64,
    base_branch: &str,
    worktree_root: &Path,
    main_dir: &Path,
) -> Result<AgentWorktree> {
    let repo = Repository::open(main_dir)
        .with_context(|| format!("failed to open repository at {}", main_dir.display()))?;

    let branch_name = format!("ralphy/agent-{}-{}", agent_num, slugify(task_title));
    let worktree_name = format!("agent-{}", agent_num);
    let worktree_dir = worktree_root.join(&worktree_name);

    prune_stale_worktrees(&repo);

    // A registered worktree of the same name is a leftover; remove it so
    // the branch below can be deleted and re-created.
    if let Ok(worktree) = repo.find_worktree(&worktree_name) {
        let mut options = WorktreePruneOptions::new();
        options.valid(true).locked(true).working_tree(true);
        let _ = worktree.prune(Some(&mut options));
    }

    if let Ok(mut branch) = repo.find_branch(&branch_name, BranchType::Local) {
        branch
            .delete()
            .with_context(|| format!("failed to delete leftover branch {}", branch_name))?;
    }

    let base = repo
        .revparse_single(base_branch)
        .with_context(|| format!("base branch not found: {}", base_branch))?
        .peel_to_commit()
        .context("base branch does not point at a commit")?;
    repo.branch(&branch_name, &base, true)
        .with_context(|| format!("failed to create branch {}", branch_name))?;

    if worktree_dir.exists() {
        fs::remove_dir_all(&worktree_dir)
            .with_context(|| format!("failed to remove {}", worktree_dir.display()))?;
    }

    let branch_ref = repo
        .find_branch(&branch_name, BranchType::Local)?
        .into_reference();
    let mut options = WorktreeAddOptions::new();
    options.reference(Some(&branch_ref));
    repo.worktree(&worktree_name, &worktree_dir, Some(&options))
        .with_context(|| format!("failed to add worktree at {}", worktree_dir.display()))?;

    Ok(AgentWorktree {
        worktree_dir,
        branch_name,
    })
}

/// Remove an agent worktree unless it still has uncommitted work; such a
/// worktree is left in place so nothing is silently discarded. The branch
/// is always preserved, it may carry commits wanted for merge or PR.
pub fn cleanup_agent_worktree(
    worktree_dir: &Path,
    branch_name: &str,
    main_dir: &Path,
) -> Result<CleanupOutcome> {
    if worktree_dir.exists() {
        let worktree_repo = Repository::open(worktree_dir)
            .with_context(|| format!("failed to open worktree at {}", worktree_dir.display()))?;
        let mut options = StatusOptions::new();
        options.include_untracked(true);
        let statuses = worktree_repo.statuses(Some(&mut options))?;
        if !statuses.is_empty() {
            return Ok(CleanupOutcome {
                left_in_place: true,
            });
        }
    }

    let repo = Repository::open(main_dir)
        .with_context(|| format!("failed to open repository at {}", main_dir.display()))?;

    if let Some(name) = worktree_dir.file_name().and_then(|n| n.to_str()) {
        if let Ok(worktree) = repo.find_worktree(name) {
            if worktree_dir.exists() {
                let _ = fs::remove_dir_all(worktree_dir);
            }
            let mut options = WorktreePruneOptions::new();
            options.valid(true).working_tree(true);
            let _ = worktree.prune(Some(&mut options));
        } else if worktree_dir.exists() {
            let _ = fs::remove_dir_all(worktree_dir);
        }
    }

    log::debug!("[Worktree] Preserved branch {}", branch_name);

    Ok(CleanupOutcome {
        left_in_place: false,
    })
}

/// Paths of all ralphy-managed worktrees registered in the repository
pub fn list_worktrees(work_dir: &Path) -> Result<Vec<PathBuf>> {
    let repo = Repository::open(work_dir)
        .with_context(|| format!("failed to open repository at {}", work_dir.display()))?;

    let mut paths = Vec::new();
    for name in repo.worktrees()?.iter().flatten() {
        if let Ok(worktree) = repo.find_worktree(name) {
            let path = worktree.path().to_path_buf();
            if path
                .components()
                .any(|c| c.as_os_str() == ".ralphy-worktrees")
            {
                paths.push(path);
            }
        }
    }
    Ok(paths)
}

/// Remove every ralphy-managed worktree, pruning stale registrations.
/// Recovery helper for worktrees left behind by interrupted runs.
pub fn cleanup_all_worktrees(work_dir: &Path) -> Result<usize> {
    let repo = Repository::open(work_dir)
        .with_context(|| format!("failed to open repository at {}", work_dir.display()))?;

    let mut removed = 0;
    for path in list_worktrees(work_dir)? {
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if let Ok(worktree) = repo.find_worktree(name) {
                if path.exists() {
                    let _ = fs::remove_dir_all(&path);
                }
                let mut options = WorktreePruneOptions::new();
                options.valid(true).locked(true).working_tree(true);
                if worktree.prune(Some(&mut options)).is_ok() {
                    removed += 1;
                }
            }
        }
    }

    prune_stale_worktrees(&repo);
    Ok(removed)
}

fn prune_stale_worktrees(repo: &Repository) {
    let names = match repo.worktrees() {
        Ok(names) => names,
        Err(_) => return,
    };

    for name in names.iter().flatten() {
        if let Ok(worktree) = repo.find_worktree(name) {
            let mut check = WorktreePruneOptions::new();
            if worktree.is_prunable(Some(&mut check)).unwrap_or(false) {
                let mut options = WorktreePruneOptions::new();
                let _ = worktree.prune(Some(&mut options));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::branch::{branch_exists, current_branch};
    use tempfile::TempDir;

    fn setup_test_repo() -> (TempDir, PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let repo = Repository::init(temp_dir.path()).unwrap();

        let sig = git2::Signature::now("Test User", "test@example.com").unwrap();
        let tree_id = {
            let mut index = repo.index().unwrap();
            fs::write(temp_dir.path().join("test.txt"), "Hello, World!").unwrap();
            index.add_path(Path::new("test.txt")).unwrap();
            index.write().unwrap();
            index.write_tree().unwrap()
        };

        let tree = repo.find_tree(tree_id).unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "Initial commit", &tree, &[])
            .unwrap();

        let path = temp_dir.path().to_path_buf();
        (temp_dir, path)
    }

    #[test]
    fn test_worktree_base_created_lazily() {
        let (_temp, path) = setup_test_repo();
        let base = worktree_base(&path).unwrap();
        assert!(base.exists());
        assert!(base.ends_with(".ralphy-worktrees"));
    }

    #[test]
    fn test_create_agent_worktree() {
        let (_temp, path) = setup_test_repo();
        let base_branch = current_branch(&path).unwrap();
        let root = worktree_base(&path).unwrap();

        let worktree = create_agent_worktree("Add auth", 1, &base_branch, &root, &path).unwrap();

        assert_eq!(worktree.branch_name, "ralphy/agent-1-add-auth");
        assert!(worktree.worktree_dir.ends_with("agent-1"));
        assert!(worktree.worktree_dir.exists());
        assert!(worktree.worktree_dir.join("test.txt").exists());
        assert!(branch_exists(&worktree.branch_name, &path).unwrap());
    }

    #[test]
    fn test_concurrent_worktrees_have_distinct_names() {
        let (_temp, path) = setup_test_repo();
        let base_branch = current_branch(&path).unwrap();
        let root = worktree_base(&path).unwrap();

        let first = create_agent_worktree("Task one", 1, &base_branch, &root, &path).unwrap();
        let second = create_agent_worktree("Task two", 2, &base_branch, &root, &path).unwrap();

        assert_ne!(first.branch_name, second.branch_name);
        assert_ne!(first.worktree_dir, second.worktree_dir);
        assert!(first.worktree_dir.exists());
        assert!(second.worktree_dir.exists());
    }

    #[test]
    fn test_create_survives_leftovers_from_crashed_run() {
        let (_temp, path) = setup_test_repo();
        let base_branch = current_branch(&path).unwrap();
        let root = worktree_base(&path).unwrap();

        let first = create_agent_worktree("Same slot", 1, &base_branch, &root, &path).unwrap();
        // No cleanup: simulate a crashed run, then reuse the slot.
        let second = create_agent_worktree("Same slot", 1, &base_branch, &root, &path).unwrap();

        assert_eq!(first.branch_name, second.branch_name);
        assert!(second.worktree_dir.exists());
    }

    #[test]
    fn test_cleanup_removes_clean_worktree_but_keeps_branch() {
        let (_temp, path) = setup_test_repo();
        let base_branch = current_branch(&path).unwrap();
        let root = worktree_base(&path).unwrap();

        let worktree = create_agent_worktree("Cleanup me", 1, &base_branch, &root, &path).unwrap();
        let outcome =
            cleanup_agent_worktree(&worktree.worktree_dir, &worktree.branch_name, &path).unwrap();

        assert!(!outcome.left_in_place);
        assert!(!worktree.worktree_dir.exists());
        assert!(branch_exists(&worktree.branch_name, &path).unwrap());
    }

    #[test]
    fn test_cleanup_leaves_dirty_worktree_in_place() {
        let (_temp, path) = setup_test_repo();
        let base_branch = current_branch(&path).unwrap();
        let root = worktree_base(&path).unwrap();

        let worktree = create_agent_worktree("Dirty one", 1, &base_branch, &root, &path).unwrap();
        fs::write(worktree.worktree_dir.join("uncommitted.txt"), "work").unwrap();

        let outcome =
            cleanup_agent_worktree(&worktree.worktree_dir, &worktree.branch_name, &path).unwrap();

        assert!(outcome.left_in_place);
        assert!(worktree.worktree_dir.exists());
        assert!(worktree.worktree_dir.join("uncommitted.txt").exists());
    }

    #[test]
    fn test_list_and_cleanup_all_worktrees() {
        let (_temp, path) = setup_test_repo();
        let base_branch = current_branch(&path).unwrap();
        let root = worktree_base(&path).unwrap();

        create_agent_worktree("One", 1, &base_branch, &root, &path).unwrap();
        create_agent_worktree("Two", 2, &base_branch, &root, &path).unwrap();

        assert_eq!(list_worktrees(&path).unwrap().len(), 2);

        let removed = cleanup_all_worktrees(&path).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(list_worktrees(&path).unwrap().len(), 0);
    }
}
