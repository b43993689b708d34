// Branch operations on the main working copy

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use git2::{BranchType, Repository, StashFlags, StatusOptions};

/// Slugify text for branch names: lowercase, non-alphanumeric runs
/// collapsed to `-`, trimmed, at most 50 characters
pub fn slugify(text: &str) -> String {
    let mut slug = String::new();
    let mut pending_dash = false;

    for ch in text.to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch);
        } else {
            pending_dash = true;
        }
    }

    slug.chars().take(50).collect()
}

fn open(work_dir: &Path) -> Result<Repository> {
    Repository::open(work_dir)
        .with_context(|| format!("failed to open repository at {}", work_dir.display()))
}

/// Name of the branch HEAD currently points at
pub fn current_branch(work_dir: &Path) -> Result<String> {
    let repo = open(work_dir)?;
    let head = repo.head().context("failed to read HEAD")?;
    Ok(head.shorthand().unwrap_or("HEAD").to_string())
}

/// Default base branch: `main`, then `master`, then whatever HEAD is on
pub fn default_base_branch(work_dir: &Path) -> Result<String> {
    let repo = open(work_dir)?;
    for name in ["main", "master"] {
        if repo.find_branch(name, BranchType::Local).is_ok() {
            return Ok(name.to_string());
        }
    }
    drop(repo);
    current_branch(work_dir)
}

/// Check out a branch (or any revspec) in the working copy
pub fn checkout_branch(work_dir: &Path, name: &str) -> Result<()> {
    let repo = open(work_dir)?;
    checkout_in(&repo, name)
}

pub(crate) fn checkout_in(repo: &Repository, name: &str) -> Result<()> {
    let (object, reference) = repo
        .revparse_ext(name)
        .with_context(|| format!("branch not found: {}", name))?;

    repo.checkout_tree(&object, None)
        .with_context(|| format!("failed to check out {}", name))?;

    match reference {
        Some(reference) => {
            let ref_name = reference
                .name()
                .ok_or_else(|| anyhow!("non-utf8 reference name"))?;
            repo.set_head(ref_name)?;
        }
        None => repo.set_head_detached(object.id())?,
    }
    Ok(())
}

/// Create (or reuse) a task branch off `base_branch` and check it out.
/// Uncommitted changes are stashed around the branch switch and restored
/// afterwards. Returns the branch name `ralphy/<slug>`.
pub fn create_task_branch(task: &str, base_branch: &str, work_dir: &Path) -> Result<String> {
    let mut repo = open(work_dir)?;
    let branch_name = format!("ralphy/{}", slugify(task));

    let mut stashed = false;
    if has_changes(&repo)? {
        let signature = signature(&repo)?;
        if repo
            .stash_save(&signature, "ralphy-autostash", Some(StashFlags::INCLUDE_UNTRACKED))
            .is_ok()
        {
            stashed = true;
        }
    }

    let result = (|| -> Result<String> {
        checkout_in(&repo, base_branch)?;

        if repo.find_branch(&branch_name, BranchType::Local).is_err() {
            let head = repo.head()?.peel_to_commit()?;
            repo.branch(&branch_name, &head, false)?;
        }
        checkout_in(&repo, &branch_name)?;
        Ok(branch_name.clone())
    })();

    if stashed {
        if let Err(error) = repo.stash_pop(0, None) {
            log::warn!("[Git] Failed to restore stashed changes: {}", error);
        }
    }

    result
}

/// Return to the base branch, ignoring failures
pub fn return_to_base_branch(base_branch: &str, work_dir: &Path) {
    if let Err(error) = checkout_branch(work_dir, base_branch) {
        log::warn!("[Git] Failed to return to {}: {}", base_branch, error);
    }
}

/// Whether the working copy has uncommitted changes (including untracked
/// files)
pub fn has_uncommitted_changes(work_dir: &Path) -> Result<bool> {
    let repo = open(work_dir)?;
    has_changes(&repo)
}

pub(crate) fn has_changes(repo: &Repository) -> Result<bool> {
    let mut options = StatusOptions::new();
    options.include_untracked(true);
    let statuses = repo.statuses(Some(&mut options))?;
    Ok(!statuses.is_empty())
}

/// Check whether a local branch exists
pub fn branch_exists(name: &str, work_dir: &Path) -> Result<bool> {
    let repo = open(work_dir)?;
    Ok(repo.find_branch(name, BranchType::Local).is_ok())
}

/// Delete a local branch; returns false when the branch did not exist or
/// could not be deleted
pub fn delete_local_branch(name: &str, work_dir: &Path) -> bool {
    let repo = match Repository::open(work_dir) {
        Ok(repo) => repo,
        Err(_) => return false,
    };
    match repo.find_branch(name, BranchType::Local) {
        Ok(mut branch) => branch.delete().is_ok(),
        Err(_) => false,
    }
}

/// Commit signature: repository config when available, a fixed fallback
/// otherwise
pub(crate) fn signature(repo: &Repository) -> Result<git2::Signature<'static>> {
    match repo.signature() {
        Ok(signature) => Ok(signature),
        Err(_) => Ok(git2::Signature::now("ralphy", "ralphy@localhost")?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
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
    fn test_slugify() {
        assert_eq!(slugify("Fix: the BIG bug!"), "fix-the-big-bug");
        assert_eq!(slugify("Add login"), "add-login");
        assert_eq!(slugify("  spaces  everywhere  "), "spaces-everywhere");
        assert_eq!(slugify("___"), "");
    }

    #[test]
    fn test_slugify_truncates_to_50_chars() {
        let long = "a".repeat(80);
        assert_eq!(slugify(&long).len(), 50);
    }

    #[test]
    fn test_current_branch() {
        let (_temp, path) = setup_test_repo();
        let branch = current_branch(&path).unwrap();
        assert!(branch == "main" || branch == "master");
    }

    #[test]
    fn test_default_base_branch_matches_initial_branch() {
        let (_temp, path) = setup_test_repo();
        let base = default_base_branch(&path).unwrap();
        assert_eq!(base, current_branch(&path).unwrap());
    }

    #[test]
    fn test_create_task_branch() {
        let (_temp, path) = setup_test_repo();
        let base = current_branch(&path).unwrap();

        let branch = create_task_branch("Add user login", &base, &path).unwrap();
        assert_eq!(branch, "ralphy/add-user-login");
        assert_eq!(current_branch(&path).unwrap(), "ralphy/add-user-login");
        assert!(branch_exists("ralphy/add-user-login", &path).unwrap());
    }

    #[test]
    fn test_create_task_branch_reuses_existing() {
        let (_temp, path) = setup_test_repo();
        let base = current_branch(&path).unwrap();

        let first = create_task_branch("Same task", &base, &path).unwrap();
        return_to_base_branch(&base, &path);
        let second = create_task_branch("Same task", &base, &path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_create_task_branch_preserves_dirty_files() {
        let (_temp, path) = setup_test_repo();
        let base = current_branch(&path).unwrap();

        fs::write(path.join("dirty.txt"), "uncommitted").unwrap();
        create_task_branch("With dirty tree", &base, &path).unwrap();

        assert!(path.join("dirty.txt").exists());
    }

    #[test]
    fn test_has_uncommitted_changes() {
        let (_temp, path) = setup_test_repo();
        assert!(!has_uncommitted_changes(&path).unwrap());

        fs::write(path.join("new.txt"), "content").unwrap();
        assert!(has_uncommitted_changes(&path).unwrap());
    }

    #[test]
    fn test_delete_local_branch() {
        let (_temp, path) = setup_test_repo();
        let base = current_branch(&path).unwrap();

        create_task_branch("Delete me", &base, &path).unwrap();
        return_to_base_branch(&base, &path);

        assert!(delete_local_branch("ralphy/delete-me", &path));
        assert!(!branch_exists("ralphy/delete-me", &path).unwrap());
        assert!(!delete_local_branch("ralphy/delete-me", &path));
    }

    #[test]
    fn test_checkout_branch_unknown_is_error() {
        let (_temp, path) = setup_test_repo();
        assert!(checkout_branch(&path, "does-not-exist").is_err());
    }
}
