//! Standalone restore procedure for a backup directory.

use super::BackupHandle;

pub const RESTORE_SCRIPT: &str = "restore.sh";

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// AWS CLI command that puts `handle`'s bucket policy back the way it was.
/// File references are relative to the backup directory.
pub fn restore(handle: &BackupHandle) -> String {
    let record = &handle.record;
    let target = format!(
        "--bucket {} --profile {} --region {}",
        shell_quote(&record.bucket),
        shell_quote(&handle.profile),
        shell_quote(&handle.region)
    );
    if record.existed {
        format!(
            "aws s3api put-bucket-policy {target} --policy {}",
            shell_quote(&format!("file://{}", record.file))
        )
    } else {
        format!("aws s3api delete-bucket-policy {target}")
    }
}

pub(super) fn render(run_id: &str, migration_id: &str, handles: &[BackupHandle]) -> String {
    let mut script = String::from("#!/bin/sh\n");
    script.push_str(&format!(
        "# Restores the bucket policies saved before {migration_id} of run {run_id}.\n"
    ));
    script.push_str("# Requires only the AWS CLI.\nset -eu\ncd \"$(dirname \"$0\")\"\n\n");
    for handle in handles {
        let bucket = &handle.record.bucket;
        script.push_str(&format!("echo {}\n", shell_quote(&format!("Restoring policy of {bucket}"))));
        script.push_str(&restore(handle));
        script.push('\n');
    }
    script.push_str("\necho 'Restore complete'\n");
    script
}
