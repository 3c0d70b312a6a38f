//! Single-file gzip packaging
//!
//! `20260314.csv` becomes `20260314.csv.gz`. The original is removed only
//! after the archive has been written and flushed; on failure the partial
//! archive is removed and the original stays.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::Result;

/// Extension appended to packaged files
pub const ARCHIVE_EXTENSION: &str = "gz";

/// True when the file is already packaged
pub fn is_archive(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(ARCHIVE_EXTENSION)
}

/// `<file>` → `<file>.gz`
pub fn archive_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(ARCHIVE_EXTENSION);
    PathBuf::from(name)
}

/// Compress `source` and remove it
///
/// # Returns
///
/// Path of the archive.
///
/// # Errors
///
/// Returns `Io` if the source cannot be read or the archive cannot be
/// written. The source is left untouched in that case.
pub fn compress(source: &Path) -> Result<PathBuf> {
    let target = archive_path(source);

    if let Err(e) = write_archive(source, &target) {
        let _ = fs::remove_file(&target);
        return Err(e.into());
    }

    fs::remove_file(source)?;
    debug!("Packaged {} into {}", source.display(), target.display());
    Ok(target)
}

fn write_archive(source: &Path, target: &Path) -> io::Result<()> {
    let mut input = BufReader::new(File::open(source)?);
    let output = BufWriter::new(File::create(target)?);

    let mut encoder = GzEncoder::new(output, Compression::default());
    io::copy(&mut input, &mut encoder)?;
    encoder.finish()?.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::TempDir;

    #[test]
    fn test_archive_path() {
        assert_eq!(
            archive_path(Path::new("/data/pending/20260314.csv")),
            PathBuf::from("/data/pending/20260314.csv.gz")
        );
        assert!(is_archive(Path::new("20260314.csv.gz")));
        assert!(!is_archive(Path::new("20260314.csv")));
    }

    #[test]
    fn test_compress_replaces_original() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("20260314.csv");
        let content = "Site Name : LakeStation\n1.0000,2026,03,14,00,00,01\n".repeat(50);
        fs::write(&source, &content).unwrap();

        let archive = compress(&source).unwrap();
        assert!(!source.exists());
        assert_eq!(archive, dir.path().join("20260314.csv.gz"));

        let mut decoded = String::new();
        GzDecoder::new(File::open(&archive).unwrap())
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, content);
    }

    #[test]
    fn test_missing_source_leaves_nothing_behind() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("20260314.csv");

        assert!(compress(&source).is_err());
        assert!(!archive_path(&source).exists());
    }
}
