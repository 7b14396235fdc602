//! In-memory cloud used by unit tests. Records every call and can be told to
//! fail the next invocation of an operation.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::aws::{
    DataSyncApi, IamApi, LocationSpec, ProviderError, ProviderResult, Providers, RoleDescriptor,
    S3Api, StsApi, TaskSpec,
};
use crate::policy::naming::role_arn;
use crate::policy::trust_policy;
use crate::types::PolicyDocument;

pub const SOURCE_ACCOUNT: &str = "111122223333";
pub const TARGET_ACCOUNT: &str = "444455556666";
const REGION: &str = "us-east-1";

#[derive(Default)]
struct State {
    roles: BTreeMap<String, RoleDescriptor>,
    role_policies: HashMap<(String, String), PolicyDocument>,
    /// Existing buckets and their policy.
    buckets: HashMap<String, Option<PolicyDocument>>,
    locations: Vec<String>,
    tasks: Vec<String>,
    next_id: u32,
    calls: Vec<String>,
    failures: HashMap<String, VecDeque<ProviderError>>,
}

impl State {
    fn next_arn(&mut self, kind: &str, prefix: &str) -> String {
        self.next_id += 1;
        format!(
            "arn:aws:datasync:{REGION}:{SOURCE_ACCOUNT}:{kind}/{prefix}-{:017x}",
            self.next_id
        )
    }
}

#[derive(Default)]
pub struct FakeCloud {
    state: Mutex<State>,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Providers backed by this cloud. Both bucket sides share one namespace.
    pub fn providers(self: &Arc<Self>) -> Providers {
        Providers {
            iam: self.clone(),
            datasync: self.clone(),
            source_s3: self.clone(),
            destination_s3: self.clone(),
            source_sts: Arc::new(FakeAccount(SOURCE_ACCOUNT)),
            target_sts: Arc::new(FakeAccount(TARGET_ACCOUNT)),
        }
    }

    /// Fail the next call of `operation`. A key of the form
    /// `"<Operation> <target>"` only matches calls on that target.
    pub fn fail_next(&self, operation: &str, error: ProviderError) {
        self.lock()
            .failures
            .entry(operation.to_string())
            .or_default()
            .push_back(error);
    }

    pub fn add_role(&self, name: &str) -> String {
        let arn = role_arn(SOURCE_ACCOUNT, name);
        self.lock().roles.insert(
            name.to_string(),
            RoleDescriptor {
                name: name.to_string(),
                arn: arn.clone(),
                trust_policy: Some(trust_policy(SOURCE_ACCOUNT, REGION)),
            },
        );
        arn
    }

    pub fn has_role(&self, name: &str) -> bool {
        self.lock().roles.contains_key(name)
    }

    pub fn role_policy(&self, role: &str, policy: &str) -> Option<PolicyDocument> {
        self.lock()
            .role_policies
            .get(&(role.to_string(), policy.to_string()))
            .cloned()
    }

    pub fn add_bucket(&self, name: &str, policy: Option<PolicyDocument>) {
        self.lock().buckets.insert(name.to_string(), policy);
    }

    pub fn bucket_policy(&self, name: &str) -> Option<PolicyDocument> {
        self.lock().buckets.get(name).cloned().flatten()
    }

    /// Create a location without recording a call.
    pub fn seed_location(&self, _bucket: &str) -> String {
        let mut state = self.lock();
        let arn = state.next_arn("location", "loc");
        state.locations.push(arn.clone());
        arn
    }

    pub fn seed_task(&self, _source: &str, _destination: &str) -> String {
        let mut state = self.lock();
        let arn = state.next_arn("task", "task");
        state.tasks.push(arn.clone());
        arn
    }

    pub fn locations(&self) -> Vec<String> {
        self.lock().locations.clone()
    }

    pub fn tasks(&self) -> Vec<String> {
        self.lock().tasks.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn calls_matching(&self, prefix: &str) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Record the call and pop a scripted failure for it, if any.
    fn enter(&self, operation: &str, target: &str) -> ProviderResult<std::sync::MutexGuard<'_, State>> {
        let mut state = self.lock();
        let targeted = format!("{operation} {target}");
        state.calls.push(targeted.clone());
        let scripted = [targeted.as_str(), operation]
            .into_iter()
            .find_map(|key| state.failures.get_mut(key).and_then(VecDeque::pop_front));
        match scripted {
            Some(error) => Err(error),
            None => Ok(state),
        }
    }
}

fn not_found(operation: &str, code: &str, what: &str) -> ProviderError {
    ProviderError::service(operation, code, format!("{what} not found"))
}

#[async_trait]
impl IamApi for FakeCloud {
    async fn get_role(&self, name: &str) -> ProviderResult<Option<RoleDescriptor>> {
        let state = self.enter("GetRole", name)?;
        Ok(state.roles.get(name).cloned())
    }

    async fn create_role(
        &self,
        name: &str,
        trust_policy: &PolicyDocument,
        _description: &str,
    ) -> ProviderResult<RoleDescriptor> {
        let mut state = self.enter("CreateRole", name)?;
        if state.roles.contains_key(name) {
            return Err(ProviderError::service("CreateRole", "EntityAlreadyExists", name));
        }
        let role = RoleDescriptor {
            name: name.to_string(),
            arn: role_arn(SOURCE_ACCOUNT, name),
            trust_policy: Some(trust_policy.clone()),
        };
        state.roles.insert(name.to_string(), role.clone());
        Ok(role)
    }

    async fn put_role_policy(
        &self,
        role_name: &str,
        policy_name: &str,
        policy: &PolicyDocument,
    ) -> ProviderResult<()> {
        let mut state = self.enter("PutRolePolicy", &format!("{role_name}/{policy_name}"))?;
        if !state.roles.contains_key(role_name) {
            return Err(not_found("PutRolePolicy", "NoSuchEntity", role_name));
        }
        state
            .role_policies
            .insert((role_name.to_string(), policy_name.to_string()), policy.clone());
        Ok(())
    }
}

#[async_trait]
impl S3Api for FakeCloud {
    async fn head_bucket(&self, bucket: &str) -> ProviderResult<()> {
        let state = self.enter("HeadBucket", bucket)?;
        if state.buckets.contains_key(bucket) {
            Ok(())
        } else {
            Err(not_found("HeadBucket", "NotFound", bucket))
        }
    }

    async fn get_bucket_policy(&self, bucket: &str) -> ProviderResult<Option<PolicyDocument>> {
        let state = self.enter("GetBucketPolicy", bucket)?;
        state
            .buckets
            .get(bucket)
            .cloned()
            .ok_or_else(|| not_found("GetBucketPolicy", "NoSuchBucket", bucket))
    }

    async fn put_bucket_policy(&self, bucket: &str, policy: &PolicyDocument) -> ProviderResult<()> {
        let mut state = self.enter("PutBucketPolicy", bucket)?;
        match state.buckets.get_mut(bucket) {
            Some(slot) => {
                *slot = Some(policy.clone());
                Ok(())
            }
            None => Err(not_found("PutBucketPolicy", "NoSuchBucket", bucket)),
        }
    }
}

#[async_trait]
impl DataSyncApi for FakeCloud {
    async fn create_location_s3(&self, spec: &LocationSpec) -> ProviderResult<String> {
        let mut state = self.enter("CreateLocationS3", &spec.bucket)?;
        let arn = state.next_arn("location", "loc");
        state.locations.push(arn.clone());
        Ok(arn)
    }

    async fn delete_location(&self, location_arn: &str) -> ProviderResult<()> {
        let mut state = self.enter("DeleteLocation", location_arn)?;
        let before = state.locations.len();
        state.locations.retain(|l| l != location_arn);
        if state.locations.len() == before {
            return Err(not_found("DeleteLocation", "InvalidRequestException", location_arn));
        }
        Ok(())
    }

    async fn create_task(&self, spec: &TaskSpec) -> ProviderResult<String> {
        let mut state = self.enter("CreateTask", &spec.name)?;
        for location in [&spec.source_location_arn, &spec.destination_location_arn] {
            if !state.locations.contains(location) {
                return Err(not_found("CreateTask", "InvalidRequestException", location));
            }
        }
        let arn = state.next_arn("task", "task");
        state.tasks.push(arn.clone());
        Ok(arn)
    }

    async fn delete_task(&self, task_arn: &str) -> ProviderResult<()> {
        let mut state = self.enter("DeleteTask", task_arn)?;
        let before = state.tasks.len();
        state.tasks.retain(|t| t != task_arn);
        if state.tasks.len() == before {
            return Err(not_found("DeleteTask", "InvalidRequestException", task_arn));
        }
        Ok(())
    }
}

struct FakeAccount(&'static str);

#[async_trait]
impl StsApi for FakeAccount {
    async fn caller_account_id(&self) -> ProviderResult<String> {
        Ok(self.0.to_string())
    }
}
