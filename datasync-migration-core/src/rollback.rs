//! Compensating cleanup for resources created during one migration.
//!
//! A coordinator lives exactly as long as one migration, so a failure in a
//! later migration can never touch resources of an earlier, completed one.

use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::aws::DataSyncApi;
use crate::retry::{with_retry, ErrorClassifier, RetryPolicy};
use crate::types::{Origin, ProvisionedResource, ResourceKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RollbackState {
    Active,
    Completed,
    RollingBack,
    RolledBack,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "kebab-case")]
pub enum CompensationResult {
    Deleted,
    Failed(String),
    /// Shared across migrations (IAM role and its policy); never deleted.
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compensation {
    pub resource: ProvisionedResource,
    pub result: CompensationResult,
}

/// Outcome of every compensating action, in the order they were attempted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackReport {
    pub compensations: Vec<Compensation>,
}

impl RollbackReport {
    pub fn succeeded(&self) -> usize {
        self.count(|r| matches!(r, CompensationResult::Deleted))
    }

    pub fn failed(&self) -> usize {
        self.count(|r| matches!(r, CompensationResult::Failed(_)))
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }

    fn count(&self, predicate: impl Fn(&CompensationResult) -> bool) -> usize {
        self.compensations
            .iter()
            .filter(|c| predicate(&c.result))
            .count()
    }
}

impl fmt::Display for RollbackReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let succeeded = self.succeeded();
        match (succeeded, succeeded + self.failed()) {
            (_, 0) if self.compensations.is_empty() => return f.write_str("no compensations needed"),
            (_, 0) => f.write_str("nothing deleted")?,
            (1, 1) => f.write_str("the compensation succeeded")?,
            (2, 2) => f.write_str("both compensations succeeded")?,
            (s, attempted) if s == attempted => {
                write!(f, "all {attempted} compensations succeeded")?;
            }
            (s, attempted) => write!(f, "{s}/{attempted} compensations succeeded")?,
        }
        for c in &self.compensations {
            match &c.result {
                CompensationResult::Deleted => {}
                CompensationResult::Failed(reason) => write!(
                    f,
                    "; {} {} left behind: {}",
                    c.resource.kind, c.resource.identifier, reason
                )?,
                CompensationResult::Skipped(reason) => write!(
                    f,
                    "; {} {} left in place ({})",
                    c.resource.kind, c.resource.identifier, reason
                )?,
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct RollbackCoordinator {
    state: RollbackState,
    registry: Vec<ProvisionedResource>,
}

impl Default for RollbackCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl RollbackCoordinator {
    pub fn new() -> Self {
        Self {
            state: RollbackState::Active,
            registry: Vec::new(),
        }
    }

    pub fn state(&self) -> RollbackState {
        self.state
    }

    /// Record a resource. Only resources created in this run are eligible
    /// for compensation; pre-existing ones are ignored.
    pub fn register(&mut self, resource: ProvisionedResource) {
        debug_assert_eq!(self.state, RollbackState::Active);
        if resource.origin == Origin::CreatedThisRun {
            self.registry.push(resource);
        }
    }

    pub fn registered(&self) -> &[ProvisionedResource] {
        &self.registry
    }

    /// True when a failure now would leave resources behind.
    pub fn needs_rollback(&self) -> bool {
        self.state == RollbackState::Active && !self.registry.is_empty()
    }

    /// Mark the migration as successful; the registry is released.
    pub fn complete(&mut self) {
        self.state = RollbackState::Completed;
        self.registry.clear();
    }

    /// Delete every registered resource in reverse registration order.
    ///
    /// Failures are logged and recorded; they never stop the remaining
    /// deletions.
    pub async fn rollback(
        &mut self,
        datasync: &dyn DataSyncApi,
        retry: RetryPolicy,
    ) -> RollbackReport {
        self.state = RollbackState::RollingBack;
        warn!(
            "Rolling back {} resource(s) created by this migration",
            self.registry.len()
        );

        let classifier = ErrorClassifier::default();
        let mut report = RollbackReport::default();
        while let Some(resource) = self.registry.pop() {
            let outcome = match resource.kind {
                ResourceKind::Task => {
                    with_retry(retry, |e| classifier.classify(e), || {
                        datasync.delete_task(&resource.identifier)
                    })
                    .await
                }
                ResourceKind::Location => {
                    with_retry(retry, |e| classifier.classify(e), || {
                        datasync.delete_location(&resource.identifier)
                    })
                    .await
                }
                ResourceKind::Role | ResourceKind::Policy => {
                    warn!(
                        "Leaving {} {} in place: shared by all migrations",
                        resource.kind, resource.identifier
                    );
                    report.compensations.push(Compensation {
                        resource,
                        result: CompensationResult::Skipped(
                            "shared by all migrations".to_string(),
                        ),
                    });
                    continue;
                }
            };

            let result = match outcome {
                Ok(()) => {
                    info!("Deleted {}: {}", resource.kind, resource.identifier);
                    CompensationResult::Deleted
                }
                Err(failure) => {
                    error!(
                        "Rollback failed for {} {}: {}",
                        resource.kind, resource.identifier, failure.error
                    );
                    CompensationResult::Failed(failure.error.to_string())
                }
            };
            report.compensations.push(Compensation { resource, result });
        }

        self.state = RollbackState::RolledBack;
        report
    }
}
