//! Run logic: one shared IAM role, then each migration in configuration order.

use log::{error, info, warn};
use std::path::PathBuf;

use super::plan::MigrationPlan;
use crate::aws::{LocationSpec, StsApi, TaskSpec};
use crate::backup::{BackupStore, BucketSlot};
use crate::config::MigrationSpec;
use crate::error::{MigrationError, MigrationResult};
use crate::policy::{role_inline_policy, trust_policy};
use crate::provision::{Provisioner, RoleRequest};
use crate::retry::{with_retry, ErrorClassifier};
use crate::rollback::RollbackCoordinator;
use crate::types::{
    Failure, MigrationResources, ProvisionedResource, RunReport, RunResult, RunStatus, Stage,
};

/// A migration error tagged with the step it happened in.
struct StageError {
    stage: Stage,
    error: MigrationError,
}

trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, StageError>;
}

impl<T> AtStage<T> for MigrationResult<T> {
    fn at(self, stage: Stage) -> Result<T, StageError> {
        self.map_err(|error| StageError { stage, error })
    }
}

struct Succeeded {
    resources: MigrationResources,
    merged_sids: Vec<String>,
}

impl super::service::MigrationService {
    /// Set up every configured migration.
    ///
    /// Only failures before the first migration (account lookup) are returned
    /// as errors. Everything after that is captured per migration in the
    /// report, so one broken migration never stops the others.
    pub async fn run(&self) -> MigrationResult<RunReport> {
        let config = &self.config;
        let dry_run = self.context.dry_run;
        if dry_run {
            info!("[DRY RUN] No changes will be made");
        }

        let source_account =
            self.account_id(self.providers.source_sts.as_ref(), &config.profiles.source)
                .await?;
        let target_account =
            self.account_id(self.providers.target_sts.as_ref(), &config.profiles.target)
                .await?;
        info!("Source account: {source_account}, target account: {target_account}");

        let mut provisioner = Provisioner::new(
            self.providers.iam.as_ref(),
            self.providers.datasync.as_ref(),
            self.retry,
            config.settle_interval(),
            dry_run,
        );

        let trust = trust_policy(&source_account, &config.aws_region);
        let inline = role_inline_policy(
            &config.source_buckets(),
            &config.destination_buckets(),
            &target_account,
        );
        let request = RoleRequest {
            role_name: &config.datasync_role_name,
            policy_name: &config.iam_policy_name,
            account_id: &source_account,
            trust_policy: &trust,
            inline_policy: &inline,
        };

        let mut role_coordinator = RollbackCoordinator::new();
        let role = match provisioner.ensure_role(&request, &mut role_coordinator).await {
            Ok(role) => {
                role_coordinator.complete();
                role
            }
            Err(e) => {
                error!("IAM role setup failed: {e}");
                let rollback = if role_coordinator.needs_rollback() {
                    Some(
                        role_coordinator
                            .rollback(self.providers.datasync.as_ref(), self.retry)
                            .await,
                    )
                } else {
                    None
                };
                let results = config
                    .migrations
                    .iter()
                    .enumerate()
                    .map(|(i, spec)| {
                        failed_result(
                            i + 1,
                            spec,
                            dry_run,
                            Failure {
                                stage: Stage::Role,
                                reason: e.to_string(),
                                rollback: rollback.clone(),
                                backup_dir: None,
                            },
                        )
                    })
                    .collect();
                return Ok(self.report(None, results));
            }
        };

        let store = BackupStore::new(config.backup_root(), &config.aws_region, dry_run);
        let mut results = Vec::with_capacity(config.migrations.len());
        for (i, spec) in config.migrations.iter().enumerate() {
            let index = i + 1;
            info!(
                "Migration {index}/{}: s3://{} -> s3://{}",
                config.migrations.len(),
                spec.source_bucket,
                spec.destination_bucket
            );
            results.push(
                self.run_migration(&provisioner, &store, index, spec, &role)
                    .await,
            );
        }

        let report = self.report(Some(role), results);
        if report.all_succeeded() {
            info!("All {} migration(s) set up", report.results.len());
        } else {
            warn!(
                "{} of {} migration(s) failed",
                report.failed_count(),
                report.results.len()
            );
        }
        Ok(report)
    }

    async fn account_id(&self, sts: &dyn StsApi, profile: &str) -> MigrationResult<String> {
        let classifier = ErrorClassifier::default();
        with_retry(self.retry, |e| classifier.classify(e), || sts.caller_account_id())
            .await
            .map_err(|f| MigrationError::Access {
                resource: format!("account of profile '{profile}'"),
                reason: f.error.to_string(),
            })
    }

    fn report(&self, role: Option<ProvisionedResource>, results: Vec<RunResult>) -> RunReport {
        RunReport {
            run_id: self.context.run_id.clone(),
            dry_run: self.context.dry_run,
            role,
            results,
        }
    }

    /// Process one migration with its own rollback scope.
    async fn run_migration(
        &self,
        provisioner: &Provisioner<'_>,
        store: &BackupStore,
        index: usize,
        spec: &MigrationSpec,
        role: &ProvisionedResource,
    ) -> RunResult {
        let mut coordinator = RollbackCoordinator::new();
        let mut backup_dir = None;

        let outcome = self
            .setup_migration(
                provisioner,
                store,
                index,
                spec,
                &role.identifier,
                &mut coordinator,
                &mut backup_dir,
            )
            .await;

        match outcome {
            Ok(Succeeded {
                resources,
                merged_sids,
            }) => {
                coordinator.complete();
                info!("Migration {index} ready: task {}", resources.task_arn);
                RunResult {
                    index,
                    source_bucket: spec.source_bucket.clone(),
                    destination_bucket: spec.destination_bucket.clone(),
                    status: RunStatus::Success,
                    dry_run: self.context.dry_run,
                    resources: Some(resources),
                    failure: None,
                    merged_sids,
                }
            }
            Err(StageError { stage, error }) => {
                error!("Migration {index} failed at {stage}: {error}");
                let rollback = if coordinator.needs_rollback() {
                    let report = coordinator
                        .rollback(self.providers.datasync.as_ref(), provisioner.retry_policy())
                        .await;
                    info!("Rollback of migration {index}: {report}");
                    Some(report)
                } else {
                    None
                };
                if let Some(dir) = &backup_dir {
                    if matches!(
                        stage,
                        Stage::ApplyPolicy | Stage::CreateLocation | Stage::CreateTask
                    ) {
                        warn!(
                            "Bucket policies may have changed; restore them with {}",
                            dir.join(crate::backup::RESTORE_SCRIPT).display()
                        );
                    }
                }
                failed_result(
                    index,
                    spec,
                    self.context.dry_run,
                    Failure {
                        stage,
                        reason: error.to_string(),
                        rollback,
                        backup_dir,
                    },
                )
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn setup_migration(
        &self,
        provisioner: &Provisioner<'_>,
        store: &BackupStore,
        index: usize,
        spec: &MigrationSpec,
        role_arn: &str,
        coordinator: &mut RollbackCoordinator,
        backup_dir: &mut Option<PathBuf>,
    ) -> Result<Succeeded, StageError> {
        let source_s3 = self.providers.source_s3.as_ref();
        let destination_s3 = self.providers.destination_s3.as_ref();
        let profiles = &self.config.profiles;

        provisioner
            .verify_bucket(source_s3, &spec.source_bucket)
            .await
            .at(Stage::Verify)?;
        provisioner
            .verify_bucket(destination_s3, &spec.destination_bucket)
            .await
            .at(Stage::Verify)?;

        let source_policy = provisioner
            .fetch_bucket_policy(source_s3, &spec.source_bucket)
            .await
            .at(Stage::Verify)?;
        let destination_policy = provisioner
            .fetch_bucket_policy(destination_s3, &spec.destination_bucket)
            .await
            .at(Stage::Verify)?;

        let mut backup = store
            .open_run(index, &self.context.timestamp())
            .await
            .at(Stage::Backup)?;
        backup
            .save(
                BucketSlot::Source,
                &spec.source_bucket,
                &profiles.source,
                source_policy.as_ref(),
            )
            .await
            .at(Stage::Backup)?;
        backup
            .save(
                BucketSlot::Destination,
                &spec.destination_bucket,
                &profiles.target,
                destination_policy.as_ref(),
            )
            .await
            .at(Stage::Backup)?;
        let dir = backup.finish(&self.context.run_id).await.at(Stage::Backup)?;
        if !self.context.dry_run {
            *backup_dir = Some(dir.clone());
        }

        let plan = MigrationPlan::build(
            spec,
            role_arn,
            source_policy.as_ref(),
            destination_policy.as_ref(),
        )
        .map_err(MigrationError::from)
        .at(Stage::MergePolicy)?;

        provisioner
            .apply_bucket_policy(source_s3, &plan.source.bucket, &plan.source.merged)
            .await
            .at(Stage::ApplyPolicy)?;
        provisioner
            .apply_bucket_policy(
                destination_s3,
                &plan.destination.bucket,
                &plan.destination.merged,
            )
            .await
            .at(Stage::ApplyPolicy)?;

        let source_location_arn = provisioner
            .create_location(
                &LocationSpec::bucket_root(&spec.source_bucket, role_arn),
                coordinator,
            )
            .await
            .at(Stage::CreateLocation)?;
        let destination_location_arn = provisioner
            .create_location(
                &LocationSpec::bucket_root(&spec.destination_bucket, role_arn),
                coordinator,
            )
            .await
            .at(Stage::CreateLocation)?;

        let task = TaskSpec {
            name: plan.task_name.clone(),
            source_location_arn: source_location_arn.clone(),
            destination_location_arn: destination_location_arn.clone(),
            options: spec.options.clone(),
        };
        let task_arn = provisioner
            .create_task(&task, coordinator)
            .await
            .at(Stage::CreateTask)?;

        Ok(Succeeded {
            merged_sids: plan.merged_sids(),
            resources: MigrationResources {
                role_arn: role_arn.to_string(),
                source_location_arn,
                destination_location_arn,
                task_arn,
                task_name: plan.task_name,
                backup_dir: dir,
            },
        })
    }
}

fn failed_result(index: usize, spec: &MigrationSpec, dry_run: bool, failure: Failure) -> RunResult {
    RunResult {
        index,
        source_bucket: spec.source_bucket.clone(),
        destination_bucket: spec.destination_bucket.clone(),
        status: RunStatus::Failed,
        dry_run,
        resources: None,
        failure: Some(failure),
        merged_sids: Vec::new(),
    }
}
