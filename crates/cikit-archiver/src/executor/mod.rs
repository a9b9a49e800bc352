//! Dataset-level executors
//!
//! Each executor fans per-entity work out to a [`TaskPool`] sized by the
//! task's `concurrency` and applies `continue_on_failure` as results arrive.

mod archive;
mod fetch;
mod pool;
mod restore;

pub use archive::ArchiveExecutor;
pub use fetch::FetchExecutor;
pub use pool::{TaskLabel, TaskOutcome, TaskPool, TaskReport};
pub use restore::{load_archived_dataset, RestoreExecutor};
