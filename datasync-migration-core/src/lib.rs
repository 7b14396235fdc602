//! This crate provides the core business logic for DataSync cross-account S3
//! migration setup:
//! - Non-destructive merge of bucket policies shared with other owners
//! - Policy backups with a standalone restore script
//! - Idempotent IAM role and DataSync location/task provisioning
//! - Per-migration rollback of resources created before a failure
//!

pub mod aws;
pub mod backup;
pub mod commands;
pub mod config;
pub mod context;
mod error;
pub mod policy;
pub mod provision;
pub mod retry;
pub mod rollback;
pub mod types;

#[cfg(test)]
mod testing;

// Re-exports for a small, focused public API
pub use aws::{ProviderError, Providers};
pub use commands::MigrationService;
pub use config::{MigrationConfig, MigrationSpec, TaskOptions};
pub use context::RunContext;
pub use error::{MigrationError, MigrationResult};
pub use rollback::RollbackReport;
pub use types::{
    Failure, MigrationResources, PolicyDocument, ResourceKind, RunReport, RunResult, RunStatus,
    Stage,
};
