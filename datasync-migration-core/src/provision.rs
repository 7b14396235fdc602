//! Resource provisioner: every provider call that reads or mutates cloud
//! state for a migration goes through here, wrapped in retries.
//!
//! In dry-run mode reads still happen; mutations are logged and replaced by
//! deterministic placeholders so the caller follows the same decision path.

use log::{debug, info, warn};
use std::time::{Duration, Instant};

use crate::aws::{DataSyncApi, IamApi, LocationSpec, ProviderError, S3Api, TaskSpec};
use crate::error::{MigrationError, MigrationResult};
use crate::policy::naming::role_arn;
use crate::retry::{with_retry, ErrorClass, ErrorClassifier, RetryFailure, RetryPolicy};
use crate::rollback::RollbackCoordinator;
use crate::types::{PolicyDocument, ProvisionedResource, ResourceKind};

const ROLE_DESCRIPTION: &str = "Role for DataSync cross-account S3 migration";
const DATASYNC_SERVICE_PRINCIPAL: &str = "datasync.amazonaws.com";

/// Identifier returned in place of a real ARN when nothing was created.
pub fn placeholder(kind: ResourceKind, name: &str) -> String {
    format!("dry-run:{kind}:{name}")
}

/// IAM role inputs, shared by every migration of a run.
#[derive(Debug, Clone)]
pub struct RoleRequest<'a> {
    pub role_name: &'a str,
    pub policy_name: &'a str,
    pub account_id: &'a str,
    pub trust_policy: &'a PolicyDocument,
    pub inline_policy: &'a PolicyDocument,
}

pub struct Provisioner<'a> {
    iam: &'a dyn IamApi,
    datasync: &'a dyn DataSyncApi,
    retry: RetryPolicy,
    classifier: ErrorClassifier,
    settle_interval: Duration,
    dry_run: bool,
}

impl<'a> Provisioner<'a> {
    pub fn new(
        iam: &'a dyn IamApi,
        datasync: &'a dyn DataSyncApi,
        retry: RetryPolicy,
        settle_interval: Duration,
        dry_run: bool,
    ) -> Self {
        Self {
            iam,
            datasync,
            retry,
            classifier: ErrorClassifier::default(),
            settle_interval,
            dry_run,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Reuse the role if it exists, otherwise create it and attach the
    /// inline policy. An existing role is never modified.
    ///
    /// A role created here is registered with `coordinator` before the
    /// inline policy is attached, so a failed attachment still reports it.
    pub async fn ensure_role(
        &mut self,
        request: &RoleRequest<'_>,
        coordinator: &mut RollbackCoordinator,
    ) -> MigrationResult<ProvisionedResource> {
        let classifier = self.classifier;
        let existing = with_retry(self.retry, |e| classifier.classify(e), || {
            self.iam.get_role(request.role_name)
        })
        .await
        .map_err(|f| access_error(request.role_name, f))?;

        if let Some(role) = existing {
            info!("Using existing IAM role: {}", role.arn);
            match &role.trust_policy {
                Some(trust) if trusts_datasync(trust) => {}
                Some(_) => warn!(
                    "Trust policy of {} does not name {}; DataSync may not be able to assume it",
                    role.name, DATASYNC_SERVICE_PRINCIPAL
                ),
                None => debug!("Trust policy of {} could not be read", role.name),
            }
            return Ok(ProvisionedResource::existing(ResourceKind::Role, role.arn));
        }

        if self.dry_run {
            let arn = role_arn(request.account_id, request.role_name);
            info!(
                "[DRY RUN] Would create IAM role {} with inline policy {}",
                arn, request.policy_name
            );
            return Ok(ProvisionedResource::created(ResourceKind::Role, arn));
        }

        info!("Creating IAM role: {}", request.role_name);
        let role = with_retry(self.retry, |e| classifier.classify(e), || {
            self.iam
                .create_role(request.role_name, request.trust_policy, ROLE_DESCRIPTION)
        })
        .await
        .map_err(provisioning_error)?;
        self.classifier.role_created(Instant::now());
        let resource = ProvisionedResource::created(ResourceKind::Role, role.arn.clone());
        coordinator.register(resource.clone());

        let classifier = self.classifier;
        with_retry(self.retry, |e| classifier.classify(e), || {
            self.iam
                .put_role_policy(request.role_name, request.policy_name, request.inline_policy)
        })
        .await
        .map_err(provisioning_error)?;
        coordinator.register(ProvisionedResource::created(
            ResourceKind::Policy,
            request.policy_name,
        ));
        info!("Attached inline policy {} to {}", request.policy_name, role.name);

        if !self.settle_interval.is_zero() {
            info!(
                "Waiting {:?} for the new role to propagate",
                self.settle_interval
            );
            tokio::time::sleep(self.settle_interval).await;
        }
        Ok(resource)
    }

    /// Fail with an access error unless `bucket` is reachable through `s3`.
    pub async fn verify_bucket(&self, s3: &dyn S3Api, bucket: &str) -> MigrationResult<()> {
        let classifier = self.classifier;
        with_retry(self.retry, |e| classifier.classify(e), || s3.head_bucket(bucket))
            .await
            .map_err(|f| access_error(bucket, f))?;
        debug!("Bucket {} is reachable", bucket);
        Ok(())
    }

    pub async fn fetch_bucket_policy(
        &self,
        s3: &dyn S3Api,
        bucket: &str,
    ) -> MigrationResult<Option<PolicyDocument>> {
        let classifier = self.classifier;
        with_retry(self.retry, |e| classifier.classify(e), || {
            s3.get_bucket_policy(bucket)
        })
        .await
        .map_err(|f| access_error(bucket, f))
    }

    /// Replace the bucket policy of `bucket` with `document` in full.
    pub async fn apply_bucket_policy(
        &self,
        s3: &dyn S3Api,
        bucket: &str,
        document: &PolicyDocument,
    ) -> MigrationResult<()> {
        if self.dry_run {
            info!(
                "[DRY RUN] Would put bucket policy on {} ({} statements)",
                bucket,
                document.statement.len()
            );
            return Ok(());
        }
        let classifier = self.classifier;
        with_retry(self.retry, |e| classifier.classify(e), || {
            s3.put_bucket_policy(bucket, document)
        })
        .await
        .map_err(provisioning_error)?;
        info!("Updated bucket policy on {}", bucket);
        Ok(())
    }

    pub async fn create_location(
        &self,
        spec: &LocationSpec,
        coordinator: &mut RollbackCoordinator,
    ) -> MigrationResult<String> {
        if self.dry_run {
            info!("[DRY RUN] Would create DataSync location for s3://{}", spec.bucket);
            return Ok(placeholder(ResourceKind::Location, &spec.bucket));
        }
        let classifier = self.classifier;
        let arn = with_retry(self.retry, |e| classifier.classify(e), || {
            self.datasync.create_location_s3(spec)
        })
        .await
        .map_err(provisioning_error)?;
        coordinator.register(ProvisionedResource::created(ResourceKind::Location, arn.clone()));
        info!("Created DataSync location for s3://{}: {}", spec.bucket, arn);
        Ok(arn)
    }

    pub async fn create_task(
        &self,
        spec: &TaskSpec,
        coordinator: &mut RollbackCoordinator,
    ) -> MigrationResult<String> {
        if self.dry_run {
            info!("[DRY RUN] Would create DataSync task {}", spec.name);
            return Ok(placeholder(ResourceKind::Task, &spec.name));
        }
        let classifier = self.classifier;
        let arn = with_retry(self.retry, |e| classifier.classify(e), || {
            self.datasync.create_task(spec)
        })
        .await
        .map_err(provisioning_error)?;
        coordinator.register(ProvisionedResource::created(ResourceKind::Task, arn.clone()));
        info!("Created DataSync task {}: {}", spec.name, arn);
        Ok(arn)
    }
}

fn trusts_datasync(trust: &PolicyDocument) -> bool {
    trust.statement.iter().any(|s| {
        s.principal
            .as_ref()
            .is_some_and(|p| p.to_string().contains(DATASYNC_SERVICE_PRINCIPAL))
    })
}

fn provisioning_error(failure: RetryFailure) -> MigrationError {
    match failure.class {
        ErrorClass::Retryable => MigrationError::TransientProvider(failure.error),
        ErrorClass::Fatal => MigrationError::Provisioning(failure.error),
    }
}

fn access_error(resource: &str, failure: RetryFailure) -> MigrationError {
    match failure.class {
        ErrorClass::Retryable => MigrationError::TransientProvider(failure.error),
        ErrorClass::Fatal => MigrationError::Access {
            resource: resource.to_string(),
            reason: describe(&failure.error),
        },
    }
}

fn describe(error: &ProviderError) -> String {
    match error.code.as_str() {
        "NotFound" | "NoSuchBucket" => "does not exist".to_string(),
        "AccessDenied" | "Forbidden" => {
            "access denied with the configured credentials".to_string()
        }
        _ => error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{role_inline_policy, trust_policy};
    use crate::rollback::RollbackState;
    use crate::testing::{FakeCloud, SOURCE_ACCOUNT, TARGET_ACCOUNT};
    use crate::types::Origin;

    const ROLE: &str = "DataSyncS3MigrationRole";
    const POLICY: &str = "DataSyncS3MigrationPolicy";

    fn provisioner(cloud: &FakeCloud, dry_run: bool) -> Provisioner<'_> {
        Provisioner::new(cloud, cloud, RetryPolicy::no_delay(3), Duration::ZERO, dry_run)
    }

    async fn ensure(
        provisioner: &mut Provisioner<'_>,
        coordinator: &mut RollbackCoordinator,
    ) -> MigrationResult<ProvisionedResource> {
        let trust = trust_policy(SOURCE_ACCOUNT, "us-east-1");
        let inline = role_inline_policy(&["src"], &["dst"], TARGET_ACCOUNT);
        let request = RoleRequest {
            role_name: ROLE,
            policy_name: POLICY,
            account_id: SOURCE_ACCOUNT,
            trust_policy: &trust,
            inline_policy: &inline,
        };
        provisioner.ensure_role(&request, coordinator).await
    }

    #[tokio::test]
    async fn test_existing_role_is_reused_untouched() {
        let cloud = FakeCloud::new();
        let arn = cloud.add_role(ROLE);
        let mut coordinator = RollbackCoordinator::new();

        let role = ensure(&mut provisioner(&cloud, false), &mut coordinator)
            .await
            .unwrap();

        assert_eq!(role, ProvisionedResource::existing(ResourceKind::Role, arn));
        assert_eq!(cloud.calls(), vec![format!("GetRole {ROLE}")]);
        assert!(!coordinator.needs_rollback());
    }

    #[tokio::test]
    async fn test_missing_role_is_created_with_inline_policy() {
        let cloud = FakeCloud::new();
        let mut coordinator = RollbackCoordinator::new();

        let role = ensure(&mut provisioner(&cloud, false), &mut coordinator)
            .await
            .unwrap();

        assert_eq!(role.origin, Origin::CreatedThisRun);
        assert_eq!(role.identifier, role_arn(SOURCE_ACCOUNT, ROLE));
        assert_eq!(
            cloud.calls(),
            vec![
                format!("GetRole {ROLE}"),
                format!("CreateRole {ROLE}"),
                format!("PutRolePolicy {ROLE}/{POLICY}"),
            ]
        );
        let inline = cloud.role_policy(ROLE, POLICY).unwrap();
        assert_eq!(inline.statement.len(), 4);
    }

    #[tokio::test]
    async fn test_inline_policy_failure_reports_created_role() {
        let cloud = FakeCloud::new();
        cloud.fail_next(
            "PutRolePolicy",
            ProviderError::service("PutRolePolicy", "MalformedPolicyDocument", "bad"),
        );
        let mut coordinator = RollbackCoordinator::new();

        let err = ensure(&mut provisioner(&cloud, false), &mut coordinator)
            .await
            .unwrap_err();

        assert!(matches!(err, MigrationError::Provisioning(_)));
        assert_eq!(
            coordinator.registered(),
            &[ProvisionedResource::created(
                ResourceKind::Role,
                role_arn(SOURCE_ACCOUNT, ROLE)
            )]
        );
        // The role is reported, never deleted.
        let report = coordinator.rollback(&cloud, RetryPolicy::no_delay(1)).await;
        assert_eq!(coordinator.state(), RollbackState::RolledBack);
        assert_eq!(report.compensations.len(), 1);
        assert!(cloud.has_role(ROLE));
    }

    #[tokio::test]
    async fn test_invalid_principal_after_role_creation_is_retried() {
        let cloud = FakeCloud::new();
        cloud.add_bucket("dst", None);
        let mut provisioner = provisioner(&cloud, false);
        let mut coordinator = RollbackCoordinator::new();
        ensure(&mut provisioner, &mut coordinator).await.unwrap();

        cloud.fail_next(
            "PutBucketPolicy",
            ProviderError::service("PutBucketPolicy", "MalformedPolicy", "Invalid principal in policy"),
        );
        let doc = PolicyDocument::new(crate::policy::bucket_statements(
            "dst",
            &role_arn(SOURCE_ACCOUNT, ROLE),
        ));
        provisioner
            .apply_bucket_policy(&cloud, "dst", &doc)
            .await
            .unwrap();

        assert_eq!(cloud.calls_matching("PutBucketPolicy").len(), 2);
        assert_eq!(cloud.bucket_policy("dst"), Some(doc));
    }

    #[tokio::test]
    async fn test_invalid_principal_without_new_role_is_fatal() {
        let cloud = FakeCloud::new();
        cloud.add_bucket("dst", None);
        cloud.fail_next(
            "PutBucketPolicy",
            ProviderError::service("PutBucketPolicy", "MalformedPolicy", "Invalid principal in policy"),
        );
        let doc = PolicyDocument::new(crate::policy::bucket_statements("dst", "arn:aws:iam::1:role/R"));

        let err = provisioner(&cloud, false)
            .apply_bucket_policy(&cloud, "dst", &doc)
            .await
            .unwrap_err();

        assert!(matches!(err, MigrationError::Provisioning(_)));
        assert_eq!(cloud.calls_matching("PutBucketPolicy").len(), 1);
    }

    #[tokio::test]
    async fn test_throttling_exhaustion_is_transient() {
        let cloud = FakeCloud::new();
        for _ in 0..3 {
            cloud.fail_next(
                "CreateLocationS3",
                ProviderError::service("CreateLocationS3", "ThrottlingException", "Rate exceeded"),
            );
        }
        let mut coordinator = RollbackCoordinator::new();
        let err = provisioner(&cloud, false)
            .create_location(&LocationSpec::bucket_root("src", "arn:aws:iam::1:role/R"), &mut coordinator)
            .await
            .unwrap_err();

        assert!(matches!(err, MigrationError::TransientProvider(_)));
        assert!(coordinator.registered().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_bucket_is_access_error() {
        let cloud = FakeCloud::new();
        let err = provisioner(&cloud, false)
            .verify_bucket(&cloud, "missing")
            .await
            .unwrap_err();
        match err {
            MigrationError::Access { resource, reason } => {
                assert_eq!(resource, "missing");
                assert_eq!(reason, "does not exist");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_dry_run_skips_mutations() {
        let cloud = FakeCloud::new();
        cloud.add_bucket("src", None);
        let mut provisioner = provisioner(&cloud, true);
        let mut coordinator = RollbackCoordinator::new();

        let role = ensure(&mut provisioner, &mut coordinator).await.unwrap();
        assert_eq!(role.identifier, role_arn(SOURCE_ACCOUNT, ROLE));

        let doc = PolicyDocument::new(crate::policy::bucket_statements("src", &role.identifier));
        provisioner.apply_bucket_policy(&cloud, "src", &doc).await.unwrap();
        let location = provisioner
            .create_location(&LocationSpec::bucket_root("src", &role.identifier), &mut coordinator)
            .await
            .unwrap();

        assert_eq!(location, "dry-run:location:src");
        assert_eq!(cloud.calls(), vec![format!("GetRole {ROLE}")]);
        assert!(cloud.bucket_policy("src").is_none());
        assert!(!coordinator.needs_rollback());
    }
}
