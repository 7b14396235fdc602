//! Cloud provider boundary: the control-plane calls migration setup depends on,
//! and their AWS SDK implementations.

pub mod clients;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::config::{MigrationConfig, TaskOptions};
use crate::types::PolicyDocument;

pub use clients::AwsProviders;

/// A failed provider call, reduced to what retry classification and
/// reporting need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    /// API operation name, e.g. `PutBucketPolicy`.
    pub operation: String,
    /// Service error code (`ThrottlingException`, `NoSuchEntity`, ...), the
    /// HTTP status name for body-less responses, or `Transport`.
    pub code: String,
    pub message: String,
}

/// Error code used for timeouts and connection failures that never reached
/// the service.
pub const TRANSPORT_ERROR_CODE: &str = "Transport";

impl ProviderError {
    pub fn service(
        operation: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation: operation.into(),
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn transport(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::service(operation, TRANSPORT_ERROR_CODE, message)
    }

    pub fn is_code(&self, code: &str) -> bool {
        self.code == code
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed with {}: {}", self.operation, self.code, self.message)
    }
}

impl std::error::Error for ProviderError {}

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Clone, PartialEq)]
pub struct RoleDescriptor {
    pub name: String,
    pub arn: String,
    /// Trust policy as reported by IAM, when it could be decoded.
    pub trust_policy: Option<PolicyDocument>,
}

/// S3 location to create in DataSync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationSpec {
    pub bucket: String,
    pub role_arn: String,
    pub subdirectory: String,
}

impl LocationSpec {
    pub fn bucket_root(bucket: &str, role_arn: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            role_arn: role_arn.to_string(),
            subdirectory: "/".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    pub name: String,
    pub source_location_arn: String,
    pub destination_location_arn: String,
    pub options: TaskOptions,
}

#[async_trait]
pub trait IamApi: Send + Sync {
    /// `Ok(None)` when no role with this name exists.
    async fn get_role(&self, name: &str) -> ProviderResult<Option<RoleDescriptor>>;

    async fn create_role(
        &self,
        name: &str,
        trust_policy: &PolicyDocument,
        description: &str,
    ) -> ProviderResult<RoleDescriptor>;

    async fn put_role_policy(
        &self,
        role_name: &str,
        policy_name: &str,
        policy: &PolicyDocument,
    ) -> ProviderResult<()>;
}

#[async_trait]
pub trait S3Api: Send + Sync {
    async fn head_bucket(&self, bucket: &str) -> ProviderResult<()>;

    /// `Ok(None)` when the bucket has no policy.
    async fn get_bucket_policy(&self, bucket: &str) -> ProviderResult<Option<PolicyDocument>>;

    /// Replace the bucket policy with `policy` in full.
    async fn put_bucket_policy(&self, bucket: &str, policy: &PolicyDocument) -> ProviderResult<()>;
}

#[async_trait]
pub trait DataSyncApi: Send + Sync {
    async fn create_location_s3(&self, spec: &LocationSpec) -> ProviderResult<String>;

    async fn delete_location(&self, location_arn: &str) -> ProviderResult<()>;

    async fn create_task(&self, spec: &TaskSpec) -> ProviderResult<String>;

    /// Only valid for tasks that were never executed.
    async fn delete_task(&self, task_arn: &str) -> ProviderResult<()>;
}

#[async_trait]
pub trait StsApi: Send + Sync {
    async fn caller_account_id(&self) -> ProviderResult<String>;
}

/// The set of collaborators one run talks to. IAM, DataSync and the source
/// bucket live in the source account; the destination bucket is reached with
/// the target account's credentials.
#[derive(Clone)]
pub struct Providers {
    pub iam: Arc<dyn IamApi>,
    pub datasync: Arc<dyn DataSyncApi>,
    pub source_s3: Arc<dyn S3Api>,
    pub destination_s3: Arc<dyn S3Api>,
    pub source_sts: Arc<dyn StsApi>,
    pub target_sts: Arc<dyn StsApi>,
}

impl Providers {
    /// Build AWS SDK clients for the source and target profiles of `config`.
    pub async fn from_config(config: &MigrationConfig) -> Self {
        AwsProviders::load(config).await.into_providers()
    }
}
