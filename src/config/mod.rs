// Project configuration and the progress log

pub mod loader;
pub mod writer;

pub use loader::{load_config, RalphyConfig};
pub use writer::{log_task_progress, TaskStatus};
