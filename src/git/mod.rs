// Git operations using git2-rs

pub mod branch;
pub mod merge;
pub mod pr;
pub mod worktree;
