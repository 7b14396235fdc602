//! Decisions for one migration, computed identically for dry and real runs.

use log::info;

use crate::config::MigrationSpec;
use crate::policy::naming::task_name;
use crate::policy::{bucket_statements, merge, MergeSummary, PolicyError};
use crate::types::PolicyDocument;

/// New bucket policy for one side of a migration.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketPlan {
    pub bucket: String,
    pub merged: PolicyDocument,
    pub summary: MergeSummary,
}

impl BucketPlan {
    fn build(
        bucket: &str,
        role_arn: &str,
        existing: Option<&PolicyDocument>,
    ) -> Result<Self, PolicyError> {
        let owned = bucket_statements(bucket, role_arn);
        let merged = merge(existing, &owned)?;
        let summary = MergeSummary::between(existing, &owned);

        if summary.existed {
            info!(
                "Merging {} statement(s) into policy of {}, keeping {} foreign statement(s)",
                summary.added.len(),
                bucket,
                summary.retained_foreign
            );
        } else {
            info!("No existing policy on {}, creating a new one", bucket);
        }
        if !summary.replaced.is_empty() {
            info!(
                "Replacing statements from a previous setup on {}: {}",
                bucket,
                summary.replaced.join(", ")
            );
        }

        Ok(Self {
            bucket: bucket.to_string(),
            merged,
            summary,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MigrationPlan {
    pub source: BucketPlan,
    pub destination: BucketPlan,
    pub task_name: String,
}

impl MigrationPlan {
    pub fn build(
        spec: &MigrationSpec,
        role_arn: &str,
        source_policy: Option<&PolicyDocument>,
        destination_policy: Option<&PolicyDocument>,
    ) -> Result<Self, PolicyError> {
        Ok(Self {
            source: BucketPlan::build(&spec.source_bucket, role_arn, source_policy)?,
            destination: BucketPlan::build(&spec.destination_bucket, role_arn, destination_policy)?,
            task_name: task_name(&spec.source_bucket, &spec.destination_bucket),
        })
    }

    /// Sids merged into either bucket policy, without repeats.
    pub fn merged_sids(&self) -> Vec<String> {
        let mut sids: Vec<String> = Vec::new();
        for sid in self
            .source
            .summary
            .added
            .iter()
            .chain(&self.destination.summary.added)
        {
            if !sids.contains(sid) {
                sids.push(sid.clone());
            }
        }
        sids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TaskOptions;
    use crate::types::Statement;

    const ROLE: &str = "arn:aws:iam::111122223333:role/DataSyncS3MigrationRole";

    fn spec() -> MigrationSpec {
        MigrationSpec {
            source_bucket: "src".into(),
            destination_bucket: "dst".into(),
            options: TaskOptions::default(),
        }
    }

    #[test]
    fn test_plan_without_existing_policies() {
        let plan = MigrationPlan::build(&spec(), ROLE, None, None).unwrap();
        assert_eq!(plan.task_name, "Migration-src-to-dst");
        assert_eq!(plan.source.merged, PolicyDocument::new(bucket_statements("src", ROLE)));
        assert!(!plan.destination.summary.existed);
        assert_eq!(
            plan.merged_sids(),
            vec!["DataSyncMig-BucketAccess", "DataSyncMig-ObjectAccess"]
        );
    }

    #[test]
    fn test_plan_keeps_foreign_statements() {
        let existing = PolicyDocument::new(vec![
            Statement::allow(&["s3:GetObject"], vec!["arn:aws:s3:::src/*".into()])
                .with_sid("JenkinsDeploy"),
        ]);
        let plan = MigrationPlan::build(&spec(), ROLE, Some(&existing), None).unwrap();
        assert_eq!(
            plan.source.merged.sids(),
            vec!["JenkinsDeploy", "DataSyncMig-BucketAccess", "DataSyncMig-ObjectAccess"]
        );
        assert_eq!(plan.source.summary.retained_foreign, 1);
    }
}
