//! Point-in-time backups of bucket policies, written before any policy is
//! changed.
//!
//! Each migration gets its own directory `<root>/mig<index>-<timestamp>/`,
//! created exclusively so two runs can never write into the same place. The
//! directory holds the original documents (or absence markers), a
//! `manifest.json` and a `restore.sh` that only needs the AWS CLI.

mod restore_script;

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{MigrationError, MigrationResult};
use crate::policy::naming::migration_id;
use crate::types::PolicyDocument;

pub use restore_script::{restore, RESTORE_SCRIPT};

pub const MANIFEST_FILE: &str = "manifest.json";

/// Which side of a migration a bucket is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketSlot {
    Source,
    Destination,
}

impl BucketSlot {
    fn file_stem(self) -> &'static str {
        match self {
            Self::Source => "source-bucket-policy",
            Self::Destination => "dest-bucket-policy",
        }
    }
}

/// What was saved for one bucket. Never rewritten once on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub migration_id: String,
    pub bucket: String,
    pub slot: BucketSlot,
    /// `false` means the bucket had no policy; restoring deletes the policy.
    pub existed: bool,
    /// File name inside the backup directory.
    pub file: String,
    pub saved_at: DateTime<Utc>,
}

/// Reference to a saved backup, enough to describe or script its restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupHandle {
    pub record: BackupRecord,
    pub path: PathBuf,
    /// AWS CLI profile with access to the bucket.
    pub profile: String,
    pub region: String,
}

#[derive(Debug, Clone)]
pub struct BackupStore {
    root: PathBuf,
    region: String,
    dry_run: bool,
}

impl BackupStore {
    pub fn new(root: impl Into<PathBuf>, region: impl Into<String>, dry_run: bool) -> Self {
        Self {
            root: root.into(),
            region: region.into(),
            dry_run,
        }
    }

    /// Create the backup directory for the `index`-th migration of a run.
    ///
    /// Fails if the directory already exists.
    pub async fn open_run(&self, index: usize, timestamp: &str) -> MigrationResult<BackupRun> {
        let migration_id = migration_id(index);
        let dir = self.root.join(format!("{migration_id}-{timestamp}"));

        if self.dry_run {
            info!("[DRY RUN] Would create backup directory {}", dir.display());
        } else {
            tokio::fs::create_dir_all(&self.root)
                .await
                .map_err(|e| MigrationError::backup(&self.root, e))?;
            tokio::fs::create_dir(&dir)
                .await
                .map_err(|e| MigrationError::backup(&dir, e))?;
        }

        Ok(BackupRun {
            migration_id,
            dir,
            region: self.region.clone(),
            dry_run: self.dry_run,
            handles: Vec::new(),
        })
    }
}

/// Backups of one migration, in progress.
#[derive(Debug)]
pub struct BackupRun {
    migration_id: String,
    dir: PathBuf,
    region: String,
    dry_run: bool,
    handles: Vec<BackupHandle>,
}

impl BackupRun {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist `document` (or its absence) for `bucket`.
    pub async fn save(
        &mut self,
        slot: BucketSlot,
        bucket: &str,
        profile: &str,
        document: Option<&PolicyDocument>,
    ) -> MigrationResult<BackupHandle> {
        let (file, content) = match document {
            Some(doc) => {
                let json = serde_json::to_string_pretty(doc).map_err(|e| {
                    MigrationError::backup(&self.dir, std::io::Error::other(e))
                })?;
                (format!("{}.json", slot.file_stem()), json)
            }
            None => (
                format!("{}.absent", slot.file_stem()),
                format!("Bucket '{bucket}' had no bucket policy.\n"),
            ),
        };
        let path = self.dir.join(&file);

        if self.dry_run {
            info!("[DRY RUN] Would back up policy of {bucket} to {}", path.display());
        } else {
            write_new_file(&path, content.as_bytes()).await?;
            match document {
                Some(_) => info!("Backed up {bucket} bucket policy to {}", path.display()),
                None => info!("No {bucket} bucket policy to back up, recorded absence"),
            }
        }

        let handle = BackupHandle {
            record: BackupRecord {
                migration_id: self.migration_id.clone(),
                bucket: bucket.to_string(),
                slot,
                existed: document.is_some(),
                file,
                saved_at: Utc::now(),
            },
            path,
            profile: profile.to_string(),
            region: self.region.clone(),
        };
        self.handles.push(handle.clone());
        Ok(handle)
    }

    /// Write the manifest and the restore script; returns the backup directory.
    pub async fn finish(self, run_id: &str) -> MigrationResult<PathBuf> {
        if self.dry_run {
            info!(
                "[DRY RUN] Would write {} and {} to {}",
                MANIFEST_FILE,
                RESTORE_SCRIPT,
                self.dir.display()
            );
            return Ok(self.dir);
        }

        let records: Vec<&BackupRecord> = self.handles.iter().map(|h| &h.record).collect();
        let manifest = serde_json::to_string_pretty(&records)
            .map_err(|e| MigrationError::backup(&self.dir, std::io::Error::other(e)))?;
        write_new_file(&self.dir.join(MANIFEST_FILE), manifest.as_bytes()).await?;

        let script_path = self.dir.join(RESTORE_SCRIPT);
        let script = restore_script::render(run_id, &self.migration_id, &self.handles);
        write_new_file(&script_path, script.as_bytes()).await?;
        make_executable(&script_path).await?;
        info!("Created restore script {}", script_path.display());

        Ok(self.dir)
    }
}

async fn write_new_file(path: &Path, content: &[u8]) -> MigrationResult<()> {
    use tokio::io::AsyncWriteExt;

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .map_err(|e| MigrationError::backup(path, e))?;
    file.write_all(content)
        .await
        .map_err(|e| MigrationError::backup(path, e))?;
    file.sync_all()
        .await
        .map_err(|e| MigrationError::backup(path, e))
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> MigrationResult<()> {
    use std::os::unix::fs::PermissionsExt;

    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .await
        .map_err(|e| MigrationError::backup(path, e))
}

#[cfg(not(unix))]
async fn make_executable(_path: &Path) -> MigrationResult<()> {
    Ok(())
}
