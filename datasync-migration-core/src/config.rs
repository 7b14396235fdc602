//! YAML configuration: a closed schema with documented defaults.
//!
//! Unknown keys anywhere in the file are rejected, so a misspelt option
//! (`TransferMod: ALL`) fails loudly instead of silently falling back to a
//! default.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use crate::error::{MigrationError, MigrationResult};

pub const DEFAULT_SETTLE_INTERVAL_SECS: u64 = 15;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Profiles {
    /// Profile for the account owning the source bucket, IAM role and DataSync resources.
    pub source: String,
    /// Profile for the account owning the destination bucket.
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationConfig {
    pub profiles: Profiles,
    pub aws_region: String,
    pub datasync_role_name: String,
    pub iam_policy_name: String,
    /// Root for policy backups; defaults to `~/Downloads/backups`.
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,
    /// Wait after creating the IAM role before it is used by another service.
    #[serde(default = "default_settle_interval_secs")]
    pub settle_interval_secs: u64,
    pub migrations: Vec<MigrationSpec>,
}

fn default_settle_interval_secs() -> u64 {
    DEFAULT_SETTLE_INTERVAL_SECS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationSpec {
    pub source_bucket: String,
    pub destination_bucket: String,
    #[serde(default)]
    pub options: TaskOptions,
}

macro_rules! option_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $value:literal),+ $(,)? } default $default:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $value)] $variant),+
        }

        impl $name {
            /// Wire value used by the DataSync API.
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $value),+
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::$default
            }
        }
    };
}

option_enum!(TransferMode { Changed => "CHANGED", All => "ALL" } default Changed);
option_enum!(VerifyMode {
    None => "NONE",
    PointInTimeConsistent => "POINT_IN_TIME_CONSISTENT",
    OnlyFilesTransferred => "ONLY_FILES_TRANSFERRED",
} default None);
option_enum!(OverwriteMode { Always => "ALWAYS", Never => "NEVER" } default Always);
option_enum!(LogLevel { Off => "OFF", Basic => "BASIC", Transfer => "TRANSFER" } default Transfer);
option_enum!(PreserveDeletedFiles { Preserve => "PRESERVE", Remove => "REMOVE" } default Preserve);
option_enum!(PreserveDevices { None => "NONE", Preserve => "PRESERVE" } default None);
option_enum!(
    /// Only sent to DataSync when configured.
    TaskMode { Basic => "BASIC", Enhanced => "ENHANCED" } default Basic
);

/// DataSync task options. Every key is optional and falls back to the
/// documented default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "PascalCase", default)]
pub struct TaskOptions {
    pub transfer_mode: TransferMode,
    pub verify_mode: VerifyMode,
    pub overwrite_mode: OverwriteMode,
    pub log_level: LogLevel,
    pub preserve_deleted_files: PreserveDeletedFiles,
    pub preserve_devices: PreserveDevices,
    pub task_mode: Option<TaskMode>,
}

impl MigrationConfig {
    /// Read, parse and validate a configuration file.
    pub fn load(path: &Path) -> MigrationResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| MigrationError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let config = Self::from_yaml(&content).map_err(|e| match e {
            MigrationError::Config { reason, .. } => MigrationError::Config {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })?;
        Ok(config)
    }

    /// Parse and validate configuration text.
    pub fn from_yaml(content: &str) -> MigrationResult<Self> {
        let config: Self = serde_yaml::from_str(content).map_err(|e| MigrationError::Config {
            path: PathBuf::new(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check every field, reporting all problems at once.
    pub fn validate(&self) -> MigrationResult<()> {
        let mut problems = Vec::new();

        if self.profiles.source.trim().is_empty() {
            problems.push("profiles.source must not be empty".to_string());
        }
        if self.profiles.target.trim().is_empty() {
            problems.push("profiles.target must not be empty".to_string());
        }
        if self.aws_region.trim().is_empty() {
            problems.push("aws_region must not be empty".to_string());
        }
        if !role_name_pattern().is_match(&self.datasync_role_name) {
            problems.push(format!(
                "datasync_role_name '{}' is not a valid IAM role name",
                self.datasync_role_name
            ));
        }
        if !policy_name_pattern().is_match(&self.iam_policy_name) {
            problems.push(format!(
                "iam_policy_name '{}' is not a valid IAM policy name",
                self.iam_policy_name
            ));
        }
        if self.migrations.is_empty() {
            problems.push("migrations must contain at least one entry".to_string());
        }

        for (i, migration) in self.migrations.iter().enumerate() {
            let index = i + 1;
            for (field, bucket) in [
                ("source_bucket", &migration.source_bucket),
                ("destination_bucket", &migration.destination_bucket),
            ] {
                if !is_valid_bucket_name(bucket) {
                    problems.push(format!(
                        "migrations[{index}].{field} '{bucket}' is not a valid S3 bucket name"
                    ));
                }
            }
            if migration.source_bucket == migration.destination_bucket {
                problems.push(format!(
                    "migrations[{index}] uses '{}' as both source and destination",
                    migration.source_bucket
                ));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(MigrationError::Validation(problems))
        }
    }

    pub fn settle_interval(&self) -> Duration {
        Duration::from_secs(self.settle_interval_secs)
    }

    /// Backup root, falling back to `~/Downloads/backups`.
    pub fn backup_root(&self) -> PathBuf {
        self.backup_dir.clone().unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map_or_else(|| PathBuf::from("."), PathBuf::from)
                .join("Downloads")
                .join("backups")
        })
    }

    pub fn source_buckets(&self) -> Vec<&str> {
        self.migrations
            .iter()
            .map(|m| m.source_bucket.as_str())
            .collect()
    }

    pub fn destination_buckets(&self) -> Vec<&str> {
        self.migrations
            .iter()
            .map(|m| m.destination_bucket.as_str())
            .collect()
    }
}

// IAM names are ASCII only; `\w` would admit any Unicode letter.
fn role_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9+=,.@_-]{1,64}$").expect("IAM role name pattern is a valid regex")
    })
}

fn policy_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9+=,.@_-]{1,128}$")
            .expect("IAM policy name pattern is a valid regex")
    })
}

fn bucket_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z0-9][a-z0-9.-]{1,61}[a-z0-9]$")
            .expect("bucket name pattern is a valid regex")
    })
}

fn is_valid_bucket_name(name: &str) -> bool {
    bucket_name_pattern().is_match(name) && !name.contains("..")
}
