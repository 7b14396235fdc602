//! Reserved names and ARN helpers.

/// Prefix reserved for statement Sids written by this tool. Statements without
/// it belong to someone else and are never modified. The trailing `-` keeps
/// Sids such as `DataSyncMigrationAudit` out of the reserved namespace.
pub const SID_PREFIX: &str = "DataSyncMig-";

/// Sids the earlier setup script wrote for the same grants. They are replaced
/// like stale owned statements so upgraded buckets do not carry both.
pub const LEGACY_SIDS: &[&str] = &["DataSyncAllowBucketAccess", "DataSyncAllowObjectAccess"];

pub fn owned_sid(suffix: &str) -> String {
    format!("{SID_PREFIX}{suffix}")
}

/// Sid written by the current naming scheme.
pub fn has_reserved_prefix(sid: Option<&str>) -> bool {
    sid.is_some_and(|s| s.len() > SID_PREFIX.len() && s.starts_with(SID_PREFIX))
}

/// Sid of any statement this tool is allowed to replace.
pub fn is_owned_sid(sid: Option<&str>) -> bool {
    has_reserved_prefix(sid) || sid.is_some_and(|s| LEGACY_SIDS.contains(&s))
}

pub fn bucket_arn(bucket: &str) -> String {
    format!("arn:aws:s3:::{bucket}")
}

pub fn objects_arn(bucket: &str) -> String {
    format!("arn:aws:s3:::{bucket}/*")
}

pub fn role_arn(account_id: &str, role_name: &str) -> String {
    format!("arn:aws:iam::{account_id}:role/{role_name}")
}

pub fn task_name(source_bucket: &str, destination_bucket: &str) -> String {
    format!("Migration-{source_bucket}-to-{destination_bucket}")
}

/// Identifier of the n-th (1-based) migration of a run.
pub fn migration_id(index: usize) -> String {
    format!("mig{index}")
}
