//! # Upload Module
//!
//! Per-file transfer of finished day files with isolated failure.
//!
//! Each pending file goes through:
//!
//! 1. **Package** - gzip into `<file>.gz` and drop the original
//! 2. **Prepare** - create `<root>/<site>/<YYYY>/<MM>` on the remote if absent
//! 3. **Transfer** - put the archive
//! 4. **Relocate** - move the archive to the uploaded area, or delete it
//!
//! A failure in one file never aborts the batch. A failed transfer is
//! logged and the archive is still relocated, so a broken destination does
//! not keep files in the pending area forever.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::storage::{is_date_named, DataStore};

pub mod archive;
pub mod remote;

pub use remote::{RemoteStore, SftpRemote};

/// What happens to a local archive once its upload attempt is over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelocationPolicy {
    /// Keep a copy in the uploaded area
    Relocate,
    /// Remove it
    Delete,
}

/// Progress of one file through the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStage {
    Pending,
    Packaged,
    Transferred,
    Relocated,
    Failed,
}

/// One file's trip through the pipeline
#[derive(Debug, Clone)]
pub struct UploadItem {
    pub local_path: PathBuf,
    pub destination: Option<String>,
    pub stage: UploadStage,
    pub transferred: bool,
}

impl UploadItem {
    fn new(local_path: &Path) -> Self {
        Self {
            local_path: local_path.to_path_buf(),
            destination: None,
            stage: UploadStage::Pending,
            transferred: false,
        }
    }
}

/// Outcome counts for one batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub transferred: usize,
    pub transfer_failed: usize,
    /// Files that could not be packaged or moved; still pending
    pub stuck: usize,
    pub items: usize,
}

impl BatchReport {
    fn record(&mut self, item: &UploadItem) {
        self.items += 1;
        if item.transferred {
            self.transferred += 1;
        } else if item.stage != UploadStage::Failed {
            self.transfer_failed += 1;
        }
        if item.stage == UploadStage::Failed {
            self.stuck += 1;
        }
    }
}

/// Remote path `<root>/<site>/<YYYY>/<MM>/<name>`
///
/// Year and month are the characters 0-3 and 4-5 of the file name.
/// Returns `None` for a name without a date prefix.
pub fn remote_path(root: &str, site: &str, name: &str) -> Option<String> {
    if !is_date_named(name) {
        return None;
    }
    Some(format!(
        "{}/{}/{}/{}/{}",
        root.trim_end_matches('/'),
        site,
        &name[0..4],
        &name[4..6],
        name
    ))
}

/// Packages and transfers pending files
pub struct UploadPipeline {
    remote: Box<dyn RemoteStore>,
    site: String,
    remote_root: String,
    uploaded_dir: PathBuf,
    failed_policy: RelocationPolicy,
}

impl UploadPipeline {
    pub fn new(config: &Config, remote: Box<dyn RemoteStore>) -> Self {
        Self {
            remote,
            site: config.site.name.clone(),
            remote_root: config.remote.root.clone(),
            uploaded_dir: PathBuf::from(&config.storage.uploaded_dir),
            failed_policy: config.storage.failed_transfer_policy,
        }
    }

    /// Upload everything in the pending area
    pub async fn run_pending(&self, store: &DataStore) -> BatchReport {
        match store.pending_files() {
            Ok(files) if files.is_empty() => {
                info!("No files pending upload");
                BatchReport::default()
            }
            Ok(files) => self.run_batch(&files, RelocationPolicy::Relocate).await,
            Err(e) => {
                warn!("Cannot scan {}: {}", store.pending_dir().display(), e);
                BatchReport::default()
            }
        }
    }

    /// Process `files` one by one
    ///
    /// `policy` applies to transferred files. Failed transfers follow the
    /// configured policy, except that ephemeral files (`Delete`) are always
    /// deleted.
    pub async fn run_batch(&self, files: &[PathBuf], policy: RelocationPolicy) -> BatchReport {
        let mut report = BatchReport::default();

        for file in files {
            let item = self.process(file, policy).await;
            info!(
                file = %item.local_path.display(),
                stage = ?item.stage,
                transferred = item.transferred,
                "Upload item finished"
            );
            report.record(&item);
        }

        info!(
            "Upload batch done: {} transferred, {} failed transfers, {} stuck",
            report.transferred, report.transfer_failed, report.stuck
        );
        report
    }

    async fn process(&self, file: &Path, policy: RelocationPolicy) -> UploadItem {
        let mut item = UploadItem::new(file);

        let packaged = if archive::is_archive(file) {
            file.to_path_buf()
        } else {
            match archive::compress(file) {
                Ok(path) => path,
                Err(e) => {
                    warn!("Packaging {} failed, will retry next pass: {}", file.display(), e);
                    item.stage = UploadStage::Failed;
                    return item;
                }
            }
        };
        item.local_path = packaged;
        item.stage = UploadStage::Packaged;

        let name = file_name(&item.local_path);
        item.destination = remote_path(&self.remote_root, &self.site, &name);

        match &item.destination {
            Some(destination) => match self.transfer(&item.local_path, destination).await {
                Ok(()) => {
                    item.transferred = true;
                    item.stage = UploadStage::Transferred;
                }
                Err(e) => warn!("Transfer of {} failed: {}", name, e),
            },
            None => warn!("{} has no date prefix, not transferring", name),
        }

        let relocation = match (item.transferred, policy) {
            (true, policy) => policy,
            (false, RelocationPolicy::Delete) => RelocationPolicy::Delete,
            (false, RelocationPolicy::Relocate) => self.failed_policy,
        };

        match self.relocate(&item.local_path, relocation) {
            Ok(()) => item.stage = UploadStage::Relocated,
            Err(e) => {
                warn!("Could not clear {} from pending: {}", item.local_path.display(), e);
                item.stage = UploadStage::Failed;
            }
        }

        item
    }

    async fn transfer(&self, local: &Path, destination: &str) -> Result<()> {
        let dir = match destination.rsplit_once('/') {
            Some((dir, _)) => dir,
            None => destination,
        };
        self.ensure_remote_dirs(dir).await?;
        self.remote.put(local, destination).await?;
        info!("Uploaded {} to {}", local.display(), destination);
        Ok(())
    }

    /// Create each missing segment below the remote root
    async fn ensure_remote_dirs(&self, dir: &str) -> Result<()> {
        let root = self.remote_root.trim_end_matches('/');
        let relative = dir.strip_prefix(root).unwrap_or(dir).trim_start_matches('/');

        let mut parent = root.to_string();
        for segment in relative.split('/').filter(|s| !s.is_empty()) {
            let child = format!("{}/{}", parent, segment);
            let exists = match self.remote.list(&parent).await {
                Ok(entries) => entries.iter().any(|e| e == segment),
                Err(e) => {
                    warn!("Listing {} failed, creating {} anyway: {}", parent, segment, e);
                    false
                }
            };
            if !exists {
                self.remote.make_dir(&child).await?;
            }
            parent = child;
        }
        Ok(())
    }

    fn relocate(&self, archive: &Path, policy: RelocationPolicy) -> Result<()> {
        match policy {
            RelocationPolicy::Relocate => {
                let target = self.uploaded_dir.join(file_name(archive));
                fs::rename(archive, &target)?;
            }
            RelocationPolicy::Delete => fs::remove_file(archive)?,
        }
        Ok(())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
