//! Run-scoped context threaded through the service instead of global state.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    /// Compute and report every decision but perform no mutation.
    pub dry_run: bool,
    pub verbose: bool,
}

impl RunContext {
    pub fn new(dry_run: bool, verbose: bool) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            dry_run,
            verbose,
        }
    }

    /// Second-resolution timestamp naming this run's backup directories.
    pub fn timestamp(&self) -> String {
        self.started_at.format("%Y%m%d-%H%M%S").to_string()
    }
}
