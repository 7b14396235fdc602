//! Shared data model: policy documents, provisioned resources and run results.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::rollback::RollbackReport;

/// IAM policy language version used for every document this tool writes.
pub const POLICY_VERSION: &str = "2012-10-17";

fn default_version() -> String {
    POLICY_VERSION.to_string()
}

/// A JSON policy document (bucket policy, trust policy or inline role policy).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<String>,
    #[serde(deserialize_with = "statement_list", default)]
    pub statement: Vec<Statement>,
}

impl PolicyDocument {
    pub fn new(statement: Vec<Statement>) -> Self {
        Self {
            version: POLICY_VERSION.to_string(),
            id: None,
            statement,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Sids of all statements that carry one, in document order.
    pub fn sids(&self) -> Vec<&str> {
        self.statement
            .iter()
            .filter_map(|s| s.sid.as_deref())
            .collect()
    }
}

// IAM accepts `"Statement": {...}` as shorthand for a one-element list.
fn statement_list<'de, D>(deserializer: D) -> Result<Vec<Statement>, D::Error>
where
    D: Deserializer<'de>,
{
    match OneOrMany::<Statement>::deserialize(deserializer)? {
        OneOrMany::Single(statement) => Ok(vec![statement]),
        OneOrMany::Multiple(statements) => Ok(statements),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

/// A single string or a list of strings, as allowed for `Action` and `Resource`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    Single(T),
    Multiple(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        match self {
            Self::Single(value) => std::slice::from_ref(value).iter(),
            Self::Multiple(values) => values.iter(),
        }
    }
}

impl From<Vec<String>> for OneOrMany<String> {
    fn from(mut values: Vec<String>) -> Self {
        if values.len() == 1 {
            Self::Single(values.remove(0))
        } else {
            Self::Multiple(values)
        }
    }
}

impl From<&str> for OneOrMany<String> {
    fn from(value: &str) -> Self {
        Self::Single(value.to_string())
    }
}

/// One permission rule. Keys this model does not name (`NotAction`,
/// `NotPrincipal`, `NotResource`, ...) are kept in `extra` so foreign
/// statements survive a read-modify-write unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sid: Option<String>,
    pub effect: Effect,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub principal: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub action: Option<OneOrMany<String>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub resource: Option<OneOrMany<String>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub condition: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Statement {
    /// Allow statement with the given actions and resources and no principal.
    pub fn allow(actions: &[&str], resources: Vec<String>) -> Self {
        Self {
            sid: None,
            effect: Effect::Allow,
            principal: None,
            action: Some(actions.iter().map(|a| (*a).to_string()).collect::<Vec<_>>().into()),
            resource: Some(resources.into()),
            condition: None,
            extra: Map::new(),
        }
    }

    pub fn with_sid(mut self, sid: impl Into<String>) -> Self {
        self.sid = Some(sid.into());
        self
    }

    pub fn with_principal(mut self, principal: Value) -> Self {
        self.principal = Some(principal);
        self
    }

    /// Add `condition_key: value` under the given condition operator.
    pub fn with_condition(mut self, operator: &str, condition_key: &str, value: &str) -> Self {
        let conditions = self.condition.get_or_insert_with(Map::new);
        let entry = conditions
            .entry(operator.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(block) = entry {
            block.insert(condition_key.to_string(), Value::String(value.to_string()));
        }
        self
    }
}

/// Kind of a cloud resource touched by a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Role,
    Policy,
    Location,
    Task,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Role => "role",
            Self::Policy => "policy",
            Self::Location => "location",
            Self::Task => "task",
        };
        f.write_str(name)
    }
}

/// Whether a resource existed before the run or was created by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Origin {
    PreExisting,
    CreatedThisRun,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedResource {
    pub kind: ResourceKind,
    /// ARN, or the name for resources addressed by name (inline policies).
    pub identifier: String,
    pub origin: Origin,
}

impl ProvisionedResource {
    pub fn created(kind: ResourceKind, identifier: impl Into<String>) -> Self {
        Self {
            kind,
            identifier: identifier.into(),
            origin: Origin::CreatedThisRun,
        }
    }

    pub fn existing(kind: ResourceKind, identifier: impl Into<String>) -> Self {
        Self {
            kind,
            identifier: identifier.into(),
            origin: Origin::PreExisting,
        }
    }
}

/// Step of a migration at which processing stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Role,
    Verify,
    Backup,
    MergePolicy,
    ApplyPolicy,
    CreateLocation,
    CreateTask,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Role => "role",
            Self::Verify => "verify",
            Self::Backup => "backup",
            Self::MergePolicy => "merge-policy",
            Self::ApplyPolicy => "apply-policy",
            Self::CreateLocation => "create-location",
            Self::CreateTask => "create-task",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failed,
}

/// Identifiers produced by a successful migration setup. In dry-run mode the
/// DataSync ARNs are placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationResources {
    pub role_arn: String,
    pub source_location_arn: String,
    pub destination_location_arn: String,
    pub task_arn: String,
    pub task_name: String,
    pub backup_dir: std::path::PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Failure {
    pub stage: Stage,
    pub reason: String,
    /// Present when compensating deletions were attempted.
    pub rollback: Option<RollbackReport>,
    /// Backup directory holding the restore script, when backups were written.
    pub backup_dir: Option<std::path::PathBuf>,
}

/// Outcome of one migration. Built once at the end of its processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    /// 1-based position of the migration in the configuration.
    pub index: usize,
    pub source_bucket: String,
    pub destination_bucket: String,
    pub status: RunStatus,
    pub dry_run: bool,
    pub resources: Option<MigrationResources>,
    pub failure: Option<Failure>,
    /// Sids of the statements merged into each bucket policy.
    pub merged_sids: Vec<String>,
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}

/// Aggregate of all migrations in one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub dry_run: bool,
    pub role: Option<ProvisionedResource>,
    pub results: Vec<RunResult>,
}

impl RunReport {
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(RunResult::is_success)
    }

    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| !r.is_success()).count()
    }
}
