//! Deterministic construction of the policy documents this tool writes.

use serde_json::json;

use super::naming::{bucket_arn, objects_arn, owned_sid};
use crate::types::{PolicyDocument, Statement};

const BUCKET_LEVEL_ACTIONS: &[&str] = &[
    "s3:GetBucketLocation",
    "s3:ListBucket",
    "s3:ListBucketMultipartUploads",
];

const SOURCE_OBJECT_ACTIONS: &[&str] = &[
    "s3:GetObject",
    "s3:GetObjectTagging",
    "s3:GetObjectVersion",
    "s3:GetObjectVersionTagging",
    "s3:ListMultipartUploadParts",
];

const DESTINATION_OBJECT_ACTIONS: &[&str] = &[
    "s3:AbortMultipartUpload",
    "s3:DeleteObject",
    "s3:GetObject",
    "s3:GetObjectTagging",
    "s3:PutObject",
    "s3:PutObjectTagging",
];

/// Trust policy letting DataSync assume the role, restricted to DataSync
/// resources of `account_id` in `region` (confused deputy protection).
pub fn trust_policy(account_id: &str, region: &str) -> PolicyDocument {
    let statement = Statement::allow(&["sts:AssumeRole"], Vec::new())
        .with_sid(owned_sid("TrustDataSync"))
        .with_principal(json!({"Service": "datasync.amazonaws.com"}))
        .with_condition("StringEquals", "aws:SourceAccount", account_id)
        .with_condition(
            "ArnLike",
            "aws:SourceArn",
            &format!("arn:aws:datasync:{region}:{account_id}:*"),
        );
    // Trust policies take no Resource element.
    PolicyDocument::new(vec![Statement {
        resource: None,
        ..statement
    }])
}

/// Inline role policy: read on every source bucket, write on every
/// destination bucket owned by `destination_account`.
pub fn role_inline_policy(
    source_buckets: &[&str],
    destination_buckets: &[&str],
    destination_account: &str,
) -> PolicyDocument {
    PolicyDocument::new(vec![
        Statement::allow(BUCKET_LEVEL_ACTIONS, arns(source_buckets, bucket_arn))
            .with_sid(owned_sid("SourceBucketAccess")),
        Statement::allow(SOURCE_OBJECT_ACTIONS, arns(source_buckets, objects_arn))
            .with_sid(owned_sid("SourceObjectAccess")),
        Statement::allow(BUCKET_LEVEL_ACTIONS, arns(destination_buckets, bucket_arn))
            .with_sid(owned_sid("DestBucketAccess"))
            .with_condition("StringEquals", "aws:ResourceAccount", destination_account),
        Statement::allow(
            DESTINATION_OBJECT_ACTIONS,
            arns(destination_buckets, objects_arn),
        )
        .with_sid(owned_sid("DestObjectAccess"))
        .with_condition("StringEquals", "aws:ResourceAccount", destination_account),
    ])
}

fn arns(buckets: &[&str], to_arn: fn(&str) -> String) -> Vec<String> {
    buckets.iter().map(|b| to_arn(b)).collect()
}

/// Statements granting the DataSync role access to `bucket`. These are the
/// owned statements merged into each bucket policy.
pub fn bucket_statements(bucket: &str, role_arn: &str) -> Vec<Statement> {
    let principal = json!({"AWS": role_arn});
    vec![
        Statement::allow(BUCKET_LEVEL_ACTIONS, vec![bucket_arn(bucket)])
            .with_sid(owned_sid("BucketAccess"))
            .with_principal(principal.clone()),
        Statement::allow(DESTINATION_OBJECT_ACTIONS, vec![objects_arn(bucket)])
            .with_sid(owned_sid("ObjectAccess"))
            .with_principal(principal),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::naming::is_owned_sid;

    #[test]
    fn test_trust_policy_has_confused_deputy_conditions() {
        let doc = trust_policy("111122223333", "eu-west-1");
        let json = serde_json::to_value(&doc).unwrap();
        let statement = &json["Statement"][0];

        assert_eq!(statement["Principal"]["Service"], "datasync.amazonaws.com");
        assert_eq!(statement["Action"], "sts:AssumeRole");
        assert!(statement.get("Resource").is_none());
        assert_eq!(
            statement["Condition"]["StringEquals"]["aws:SourceAccount"],
            "111122223333"
        );
        assert_eq!(
            statement["Condition"]["ArnLike"]["aws:SourceArn"],
            "arn:aws:datasync:eu-west-1:111122223333:*"
        );
    }

    #[test]
    fn test_role_inline_policy_covers_all_buckets() {
        let doc = role_inline_policy(&["src-a", "src-b"], &["dst-a"], "444455556666");
        assert_eq!(doc.statement.len(), 4);

        let source_objects: Vec<&String> = doc.statement[1]
            .resource
            .as_ref()
            .unwrap()
            .iter()
            .collect();
        assert_eq!(
            source_objects,
            vec!["arn:aws:s3:::src-a/*", "arn:aws:s3:::src-b/*"]
        );

        let dest = serde_json::to_value(&doc.statement[3]).unwrap();
        assert_eq!(
            dest["Condition"]["StringEquals"]["aws:ResourceAccount"],
            "444455556666"
        );
        assert_eq!(dest["Resource"], "arn:aws:s3:::dst-a/*");
    }

    #[test]
    fn test_bucket_statements_are_owned_and_scoped() {
        let role = "arn:aws:iam::111122223333:role/R";
        let statements = bucket_statements("data", role);
        assert_eq!(statements.len(), 2);
        assert!(statements.iter().all(|s| is_owned_sid(s.sid.as_deref())));

        let json = serde_json::to_value(&statements).unwrap();
        assert_eq!(json[0]["Principal"]["AWS"], role);
        assert_eq!(json[0]["Resource"], "arn:aws:s3:::data");
        assert_eq!(json[1]["Resource"], "arn:aws:s3:::data/*");
    }
}
