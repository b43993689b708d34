// Branch merging and conflict handling

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use git2::build::CheckoutBuilder;
use git2::{BranchType, MergeOptions, Repository, ResetType};

use super::branch::{checkout_in, signature};

/// Terminal state of one merge attempt: exactly one of `success`,
/// `has_conflicts`, or `error` applies.
#[derive(Debug, Clone, Default)]
pub struct MergeResult {
    pub success: bool,
    pub has_conflicts: bool,
    pub conflicted_files: Vec<String>,
    pub error: Option<String>,
}

impl MergeResult {
    fn merged() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    fn conflicted(files: Vec<String>) -> Self {
        Self {
            has_conflicts: true,
            conflicted_files: files,
            ..Default::default()
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Merge an agent branch into a target branch with a merge commit.
///
/// On conflicts the merge is left in progress, with markers in the
/// working tree, so a resolver can act on it; the conflicted paths are
/// returned rather than raised. Errors unrelated to conflicts are
/// captured in the result.
pub fn merge_agent_branch(
    branch_name: &str,
    target_branch: &str,
    work_dir: &Path,
) -> Result<MergeResult> {
    let repo = Repository::open(work_dir)
        .with_context(|| format!("failed to open repository at {}", work_dir.display()))?;

    match try_merge(&repo, branch_name, target_branch) {
        Ok(result) => Ok(result),
        Err(error) => Ok(MergeResult::failed(format!("{:#}", error))),
    }
}

fn try_merge(repo: &Repository, branch_name: &str, target_branch: &str) -> Result<MergeResult> {
    checkout_in(repo, target_branch)?;

    let branch_ref = repo
        .find_branch(branch_name, BranchType::Local)
        .with_context(|| format!("branch not found: {}", branch_name))?
        .into_reference();
    let annotated = repo.reference_to_annotated_commit(&branch_ref)?;

    let (analysis, _) = repo.merge_analysis(&[&annotated])?;
    if analysis.is_up_to_date() {
        return Ok(MergeResult::merged());
    }

    let mut merge_options = MergeOptions::new();
    let mut checkout = CheckoutBuilder::new();
    checkout.allow_conflicts(true).conflict_style_merge(true);
    repo.merge(&[&annotated], Some(&mut merge_options), Some(&mut checkout))?;

    let mut index = repo.index()?;
    if index.has_conflicts() {
        return Ok(MergeResult::conflicted(conflicted_paths(repo)?));
    }

    // Always commit with two parents; fast-forward would lose the merge
    // point.
    let tree_id = index.write_tree()?;
    let tree = repo.find_tree(tree_id)?;
    let head = repo.head()?.peel_to_commit()?;
    let theirs = repo.find_commit(annotated.id())?;
    let message = format!("Merge {} into {}", branch_name, target_branch);
    let sig = signature(repo)?;
    repo.commit(Some("HEAD"), &sig, &sig, &message, &tree, &[&head, &theirs])?;
    repo.cleanup_state()?;

    Ok(MergeResult::merged())
}

/// Paths currently in conflict in the working copy
pub fn conflicted_files(work_dir: &Path) -> Result<Vec<String>> {
    let repo = Repository::open(work_dir)
        .with_context(|| format!("failed to open repository at {}", work_dir.display()))?;
    conflicted_paths(&repo)
}

fn conflicted_paths(repo: &Repository) -> Result<Vec<String>> {
    let index = repo.index()?;
    let mut files = Vec::new();

    for conflict in index.conflicts()? {
        let conflict = conflict?;
        let entry = conflict.our.or(conflict.their).or(conflict.ancestor);
        if let Some(entry) = entry {
            files.push(String::from_utf8_lossy(&entry.path).into_owned());
        }
    }

    files.dedup();
    Ok(files)
}

/// Abort an in-progress merge, restoring the pre-merge working tree.
/// A repository with no merge in progress is left untouched.
pub fn abort_merge(work_dir: &Path) -> Result<()> {
    let repo = Repository::open(work_dir)
        .with_context(|| format!("failed to open repository at {}", work_dir.display()))?;

    if repo.state() == git2::RepositoryState::Clean {
        return Ok(());
    }

    let head = repo.head()?.peel_to_commit()?;
    let mut checkout = CheckoutBuilder::new();
    checkout.force();
    repo.reset(head.as_object(), ResetType::Hard, Some(&mut checkout))
        .context("failed to reset after merge")?;
    repo.cleanup_state()?;
    Ok(())
}

/// Whether a merge is currently in progress
pub fn is_merge_in_progress(work_dir: &Path) -> Result<bool> {
    let repo = Repository::open(work_dir)
        .with_context(|| format!("failed to open repository at {}", work_dir.display()))?;
    Ok(repo.state() == git2::RepositoryState::Merge || !conflicted_paths(&repo)?.is_empty())
}

/// Complete an in-progress merge after conflicts have been resolved.
///
/// Stages the named resolved files (or everything modified when none are
/// named) and commits with the prepared merge message. Returns false when
/// conflicts remain, or when there is no merge left to complete because
/// the resolver already committed.
pub fn complete_merge(work_dir: &Path, resolved_files: Option<&[String]>) -> Result<bool> {
    let repo = Repository::open(work_dir)
        .with_context(|| format!("failed to open repository at {}", work_dir.display()))?;

    if !conflicted_paths(&repo)?.is_empty() {
        return Ok(false);
    }

    let merge_head = match repo.find_reference("MERGE_HEAD") {
        Ok(reference) => reference.peel_to_commit()?,
        Err(_) => return Ok(false),
    };

    let mut index = repo.index()?;
    match resolved_files {
        Some(files) if !files.is_empty() => {
            for file in files {
                index.add_path(Path::new(file)).with_context(|| {
                    format!("failed to stage resolved file {}", file)
                })?;
            }
        }
        _ => {
            index.add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)?;
        }
    }
    index.write()?;

    let message = fs::read_to_string(repo.path().join("MERGE_MSG"))
        .unwrap_or_else(|_| "Merge".to_string());
    let tree_id = index.write_tree()?;
    let tree = repo.find_tree(tree_id)?;
    let head = repo.head()?.peel_to_commit()?;
    let sig = signature(&repo)?;
    repo.commit(
        Some("HEAD"),
        &sig,
        &sig,
        message.trim(),
        &tree,
        &[&head, &merge_head],
    )?;
    repo.cleanup_state()?;

    Ok(true)
}
