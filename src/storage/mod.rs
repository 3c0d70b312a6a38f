//! # Storage Module
//!
//! Local day files and the directories they move through.
//!
//! ```text
//! sampling/  -- rollover -->  pending/  -- upload -->  uploaded/
//! ```
//!
//! A day file is named `YYYYMMDD.csv` and starts with a header block
//! written exactly once:
//!
//! ```text
//! Site Name : <name>
//! Position : <lat>, <lon>          (only when a position is known)
//! <label>,<label>,...,Year,Month,Day,Hour,Minute,Second
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::StorageConfig;
use crate::error::Result;
use crate::position::PositionFix;
use crate::sensors::SampleRecord;

/// Length of the date prefix every data file name starts with
pub const DATE_PREFIX_LEN: usize = 8;

/// True when the name starts with a `YYYYMMDD` prefix
pub fn is_date_named(name: &str) -> bool {
    name.len() >= DATE_PREFIX_LEN
        && name.as_bytes()[..DATE_PREFIX_LEN]
            .iter()
            .all(u8::is_ascii_digit)
}

/// Day file name for a UTC date
pub fn day_file_name(date: NaiveDate) -> String {
    format!("{}.csv", date.format("%Y%m%d"))
}

/// The active day file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayFile {
    date: NaiveDate,
    path: PathBuf,
}

impl DayFile {
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Owns the local data directories
#[derive(Debug, Clone)]
pub struct DataStore {
    sampling_dir: PathBuf,
    pending_dir: PathBuf,
    uploaded_dir: PathBuf,
    test_dir: PathBuf,
    stale_log: Option<PathBuf>,
}

impl DataStore {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            sampling_dir: PathBuf::from(&config.sampling_dir),
            pending_dir: PathBuf::from(&config.pending_dir),
            uploaded_dir: PathBuf::from(&config.uploaded_dir),
            test_dir: PathBuf::from(&config.test_dir),
            stale_log: config.stale_log.as_ref().map(PathBuf::from),
        }
    }

    pub fn pending_dir(&self) -> &Path {
        &self.pending_dir
    }

    /// Create every data directory that does not exist yet
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            &self.sampling_dir,
            &self.pending_dir,
            &self.uploaded_dir,
            &self.test_dir,
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Open the day file for `date`, writing its header if needed
    ///
    /// The header goes into a file that is missing or empty; an existing
    /// file with content is reopened as-is so a restart on the same day
    /// never duplicates the header block.
    pub fn open_day(
        &self,
        date: NaiveDate,
        site: &str,
        position: Option<&PositionFix>,
        headings: &str,
    ) -> Result<DayFile> {
        let path = self.sampling_dir.join(day_file_name(date));
        let has_content = fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);

        if has_content {
            debug!("Reopening {}", path.display());
        } else {
            let mut header = format!("Site Name : {}\n", site);
            if let Some(position) = position {
                header.push_str(&format!("Position : {}\n", position));
            }
            header.push_str(headings);
            header.push('\n');

            fs::write(&path, header)?;
            info!("Started day file {}", path.display());
        }

        Ok(DayFile { date, path })
    }

    /// Append one sample line
    pub fn append(&self, day: &DayFile, record: &SampleRecord) -> Result<()> {
        let mut file = OpenOptions::new().append(true).create(true).open(&day.path)?;
        writeln!(file, "{}", record.to_csv_line())?;
        Ok(())
    }

    /// Move a finished day file into the pending area
    pub fn move_to_pending(&self, day: DayFile) -> Result<PathBuf> {
        let name = day.path.file_name().map(PathBuf::from).unwrap_or_default();
        let target = self.pending_dir.join(name);
        fs::rename(&day.path, &target)?;
        info!("Queued {} for upload", target.display());
        Ok(target)
    }

    /// Move date-named files not dated `today` from sampling to pending
    pub fn relocate_stale(&self, today: NaiveDate) -> Result<Vec<PathBuf>> {
        let current = day_file_name(today);
        let mut moved = Vec::new();

        for name in list_date_named(&self.sampling_dir)? {
            if name == current {
                continue;
            }
            let target = self.pending_dir.join(&name);
            fs::rename(self.sampling_dir.join(&name), &target)?;
            info!("Relocated stale file {} to pending", name);
            moved.push(target);
        }

        Ok(moved)
    }

    /// Files waiting for upload, oldest first
    pub fn pending_files(&self) -> Result<Vec<PathBuf>> {
        Ok(list_date_named(&self.pending_dir)?
            .into_iter()
            .map(|name| self.pending_dir.join(name))
            .collect())
    }

    /// Delete a process log left by an interrupted run
    ///
    /// Returns whether a log was removed.
    pub fn remove_stale_log(&self) -> Result<bool> {
        let Some(log) = &self.stale_log else {
            return Ok(false);
        };
        match fs::remove_file(log) {
            Ok(()) => {
                warn!("Removed leftover process log {}", log.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Write a small artifact used to prove the upload path works
    pub fn write_test_artifact(&self, site: &str, now: DateTime<Utc>) -> Result<PathBuf> {
        let path = self
            .test_dir
            .join(format!("{}_connectivity_test.txt", now.format("%Y%m%d_%H%M%S")));
        fs::write(&path, format!("{} connectivity test {}\n", site, now.to_rfc3339()))?;
        Ok(path)
    }
}

/// Sorted date-named file names in `dir`
fn list_date_named(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if is_date_named(name) {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}
