//! AWS SDK implementations of the provider traits.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_datasync::types as datasync;
use aws_sdk_iam::operation::get_role::GetRoleError;
use aws_sdk_iam::types::Role;
use aws_sdk_sts::config::Region;
use aws_smithy_runtime_api::client::orchestrator::HttpResponse;
use aws_smithy_runtime_api::client::result::SdkError;
use aws_smithy_types::error::display::DisplayErrorContext;
use aws_smithy_types::error::metadata::ProvideErrorMetadata;
use log::debug;
use std::sync::Arc;

use super::{
    DataSyncApi, IamApi, LocationSpec, ProviderError, ProviderResult, Providers, RoleDescriptor,
    S3Api, StsApi, TaskSpec,
};
use crate::config::MigrationConfig;
use crate::policy::naming::bucket_arn;
use crate::types::PolicyDocument;

const NO_SUCH_BUCKET_POLICY: &str = "NoSuchBucketPolicy";

/// Convert an SDK error into a `ProviderError`, keeping the service error code.
fn provider_error<E>(operation: &str, err: &SdkError<E, HttpResponse>) -> ProviderError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    match err {
        SdkError::ServiceError(context) => {
            let service_err = context.err();
            // HEAD responses carry no body, so only the status is available.
            let code = service_err.code().map_or_else(
                || status_code_name(context.raw().status().as_u16()),
                str::to_string,
            );
            let message = service_err
                .message()
                .map_or_else(|| service_err.to_string(), str::to_string);
            ProviderError::service(operation, code, message)
        }
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => {
            ProviderError::transport(operation, DisplayErrorContext(err).to_string())
        }
        _ => ProviderError::service(operation, "Unhandled", DisplayErrorContext(err).to_string()),
    }
}

fn status_code_name(status: u16) -> String {
    match status {
        403 => "AccessDenied".to_string(),
        404 => "NotFound".to_string(),
        429 => "TooManyRequestsException".to_string(),
        503 => "ServiceUnavailable".to_string(),
        other => format!("Http{other}"),
    }
}

fn serialize_policy(operation: &str, policy: &PolicyDocument) -> ProviderResult<String> {
    policy.to_json().map_err(|e| {
        ProviderError::service(
            operation,
            "MalformedInput",
            format!("Failed to serialize policy: {e}"),
        )
    })
}

fn missing_field(operation: &str, field: &str) -> ProviderError {
    ProviderError::service(
        operation,
        "MissingIdentifier",
        format!("response carried no {field}"),
    )
}

/// Trust policies come back URL-encoded from IAM.
fn decode_trust_policy(encoded: &str) -> Option<PolicyDocument> {
    let decoded = percent_encoding::percent_decode_str(encoded)
        .decode_utf8()
        .map_err(|e| debug!("Failed to URL decode trust policy: {e}"))
        .ok()?;
    PolicyDocument::from_json(&decoded)
        .map_err(|e| debug!("Failed to parse trust policy JSON: {e}"))
        .ok()
}

fn describe_role(role: &Role) -> RoleDescriptor {
    RoleDescriptor {
        name: role.role_name().to_string(),
        arn: role.arn().to_string(),
        trust_policy: role.assume_role_policy_document().and_then(decode_trust_policy),
    }
}

pub struct AwsIamClient {
    client: aws_sdk_iam::Client,
}

impl AwsIamClient {
    pub fn new(client: aws_sdk_iam::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl IamApi for AwsIamClient {
    async fn get_role(&self, name: &str) -> ProviderResult<Option<RoleDescriptor>> {
        match self.client.get_role().role_name(name).send().await {
            Ok(output) => {
                let role: Option<&Role> = output.role().into();
                role.map(describe_role)
                    .map(Some)
                    .ok_or_else(|| missing_field("GetRole", "Role"))
            }
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(GetRoleError::is_no_such_entity_exception) =>
            {
                Ok(None)
            }
            Err(err) => Err(provider_error("GetRole", &err)),
        }
    }

    async fn create_role(
        &self,
        name: &str,
        trust_policy: &PolicyDocument,
        description: &str,
    ) -> ProviderResult<RoleDescriptor> {
        let policy_json = serialize_policy("CreateRole", trust_policy)?;
        let output = self
            .client
            .create_role()
            .role_name(name)
            .assume_role_policy_document(policy_json)
            .description(description)
            .send()
            .await
            .map_err(|e| provider_error("CreateRole", &e))?;
        let role: Option<&Role> = output.role().into();
        role.map(describe_role)
            .ok_or_else(|| missing_field("CreateRole", "Role"))
    }

    async fn put_role_policy(
        &self,
        role_name: &str,
        policy_name: &str,
        policy: &PolicyDocument,
    ) -> ProviderResult<()> {
        let policy_json = serialize_policy("PutRolePolicy", policy)?;
        self.client
            .put_role_policy()
            .role_name(role_name)
            .policy_name(policy_name)
            .policy_document(policy_json)
            .send()
            .await
            .map_err(|e| provider_error("PutRolePolicy", &e))?;
        Ok(())
    }
}

pub struct AwsS3Client {
    client: aws_sdk_s3::Client,
}

impl AwsS3Client {
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl S3Api for AwsS3Client {
    async fn head_bucket(&self, bucket: &str) -> ProviderResult<()> {
        self.client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| provider_error("HeadBucket", &e))?;
        Ok(())
    }

    async fn get_bucket_policy(&self, bucket: &str) -> ProviderResult<Option<PolicyDocument>> {
        let output = match self.client.get_bucket_policy().bucket(bucket).send().await {
            Ok(output) => output,
            Err(err) => {
                let err = provider_error("GetBucketPolicy", &err);
                if err.is_code(NO_SUCH_BUCKET_POLICY) {
                    return Ok(None);
                }
                return Err(err);
            }
        };
        let Some(policy) = output.policy() else {
            return Ok(None);
        };
        PolicyDocument::from_json(policy).map(Some).map_err(|e| {
            ProviderError::service(
                "GetBucketPolicy",
                "MalformedPolicy",
                format!("Failed to parse policy of bucket '{bucket}': {e}"),
            )
        })
    }

    async fn put_bucket_policy(&self, bucket: &str, policy: &PolicyDocument) -> ProviderResult<()> {
        let policy_json = serialize_policy("PutBucketPolicy", policy)?;
        self.client
            .put_bucket_policy()
            .bucket(bucket)
            .policy(policy_json)
            .send()
            .await
            .map_err(|e| provider_error("PutBucketPolicy", &e))?;
        Ok(())
    }
}

pub struct AwsDataSyncClient {
    client: aws_sdk_datasync::Client,
}

impl AwsDataSyncClient {
    pub fn new(client: aws_sdk_datasync::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DataSyncApi for AwsDataSyncClient {
    async fn create_location_s3(&self, spec: &LocationSpec) -> ProviderResult<String> {
        let s3_config = datasync::S3Config::builder()
            .bucket_access_role_arn(&spec.role_arn)
            .build()
            .map_err(|e| ProviderError::service("CreateLocationS3", "MalformedInput", e.to_string()))?;
        let output = self
            .client
            .create_location_s3()
            .s3_bucket_arn(bucket_arn(&spec.bucket))
            .subdirectory(&spec.subdirectory)
            .s3_storage_class(datasync::S3StorageClass::Standard)
            .s3_config(s3_config)
            .send()
            .await
            .map_err(|e| provider_error("CreateLocationS3", &e))?;
        output
            .location_arn()
            .map(str::to_string)
            .ok_or_else(|| missing_field("CreateLocationS3", "LocationArn"))
    }

    async fn delete_location(&self, location_arn: &str) -> ProviderResult<()> {
        self.client
            .delete_location()
            .location_arn(location_arn)
            .send()
            .await
            .map_err(|e| provider_error("DeleteLocation", &e))?;
        Ok(())
    }

    async fn create_task(&self, spec: &TaskSpec) -> ProviderResult<String> {
        let opts = &spec.options;
        let options = datasync::Options::builder()
            .transfer_mode(datasync::TransferMode::from(opts.transfer_mode.as_str()))
            .verify_mode(datasync::VerifyMode::from(opts.verify_mode.as_str()))
            .overwrite_mode(datasync::OverwriteMode::from(opts.overwrite_mode.as_str()))
            .log_level(datasync::LogLevel::from(opts.log_level.as_str()))
            .preserve_deleted_files(datasync::PreserveDeletedFiles::from(
                opts.preserve_deleted_files.as_str(),
            ))
            .preserve_devices(datasync::PreserveDevices::from(opts.preserve_devices.as_str()))
            .build();

        let mut request = self
            .client
            .create_task()
            .source_location_arn(&spec.source_location_arn)
            .destination_location_arn(&spec.destination_location_arn)
            .name(&spec.name)
            .options(options);
        if let Some(mode) = opts.task_mode {
            request = request.task_mode(datasync::TaskMode::from(mode.as_str()));
        }

        let output = request
            .send()
            .await
            .map_err(|e| provider_error("CreateTask", &e))?;
        output
            .task_arn()
            .map(str::to_string)
            .ok_or_else(|| missing_field("CreateTask", "TaskArn"))
    }

    async fn delete_task(&self, task_arn: &str) -> ProviderResult<()> {
        self.client
            .delete_task()
            .task_arn(task_arn)
            .send()
            .await
            .map_err(|e| provider_error("DeleteTask", &e))?;
        Ok(())
    }
}

pub struct AwsStsClient {
    client: aws_sdk_sts::Client,
}

impl AwsStsClient {
    pub fn new(client: aws_sdk_sts::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StsApi for AwsStsClient {
    async fn caller_account_id(&self) -> ProviderResult<String> {
        let output = self
            .client
            .get_caller_identity()
            .send()
            .await
            .map_err(|e| provider_error("GetCallerIdentity", &e))?;
        output
            .account()
            .map(str::to_string)
            .ok_or_else(|| missing_field("GetCallerIdentity", "Account"))
    }
}

/// SDK configuration for the source and target profiles.
pub struct AwsProviders {
    source: SdkConfig,
    target: SdkConfig,
}

impl AwsProviders {
    /// Load both profiles using the standard credential provider chain.
    pub async fn load(config: &MigrationConfig) -> Self {
        Self {
            source: load_profile(&config.profiles.source, &config.aws_region).await,
            target: load_profile(&config.profiles.target, &config.aws_region).await,
        }
    }

    pub fn into_providers(self) -> Providers {
        Providers {
            iam: Arc::new(AwsIamClient::new(aws_sdk_iam::Client::new(&self.source))),
            datasync: Arc::new(AwsDataSyncClient::new(aws_sdk_datasync::Client::new(
                &self.source,
            ))),
            source_s3: Arc::new(AwsS3Client::new(aws_sdk_s3::Client::new(&self.source))),
            destination_s3: Arc::new(AwsS3Client::new(aws_sdk_s3::Client::new(&self.target))),
            source_sts: Arc::new(AwsStsClient::new(aws_sdk_sts::Client::new(&self.source))),
            target_sts: Arc::new(AwsStsClient::new(aws_sdk_sts::Client::new(&self.target))),
        }
    }
}

async fn load_profile(profile: &str, region: &str) -> SdkConfig {
    debug!("Loading AWS profile '{profile}' in {region}");
    aws_config::defaults(BehaviorVersion::latest())
        .profile_name(profile)
        .region(Region::new(region.to_string()))
        .load()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_name() {
        assert_eq!(status_code_name(403), "AccessDenied");
        assert_eq!(status_code_name(404), "NotFound");
        assert_eq!(status_code_name(500), "Http500");
    }

    #[test]
    fn test_decode_trust_policy() {
        let encoded = "%7B%22Version%22%3A%222012-10-17%22%2C%22Statement%22%3A%5B%7B%22Effect%22%3A%22Allow%22%2C%22Principal%22%3A%7B%22Service%22%3A%22datasync.amazonaws.com%22%7D%2C%22Action%22%3A%22sts%3AAssumeRole%22%7D%5D%7D";
        let doc = decode_trust_policy(encoded).unwrap();
        assert_eq!(doc.statement.len(), 1);
        assert!(decode_trust_policy("not json").is_none());
    }
}
