//! Error taxonomy for migration setup.

use std::path::PathBuf;
use thiserror::Error;

use crate::aws::ProviderError;
use crate::policy::PolicyError;

/// Errors surfaced by the migration service.
///
/// Only `Validation` and `Config` are fatal for a whole run; every other
/// variant is scoped to a single migration and recorded in its `RunResult`.
#[derive(Error, Debug)]
pub enum MigrationError {
    /// Malformed or missing configuration, detected before any provider call.
    #[error("Invalid configuration: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// Configuration file could not be read or parsed.
    #[error("Failed to load configuration from {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    /// A bucket or role could not be reached with the configured credentials.
    #[error("Cannot access {resource}: {reason}")]
    Access { resource: String, reason: String },

    /// Throttling or propagation errors that outlived the retry budget.
    #[error("{0} (retries exhausted)")]
    TransientProvider(#[source] ProviderError),

    /// A non-transient provider failure while creating or updating resources.
    #[error("{0}")]
    Provisioning(#[source] ProviderError),

    /// A policy backup could not be persisted; no mutation was attempted.
    #[error("Failed to write backup {path}: {source}")]
    Backup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The merged policy document failed validation.
    #[error("Policy merge rejected: {0}")]
    Policy(#[from] PolicyError),
}

impl MigrationError {
    pub fn backup(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Backup {
            path: path.into(),
            source,
        }
    }
}

pub type MigrationResult<T> = Result<T, MigrationError>;
