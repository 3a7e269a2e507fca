//! Scratch space for building export files and publishing them atomically.
//!
//! Every build gets its own [`TempDir`] under the scratch root, so concurrent
//! requests never share intermediate files. Finished files are written to a
//! sibling temporary file and renamed into place, so readers only ever see
//! complete files.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tempfile::TempDir;

use crate::Result;

/// Kept in every scratch root so the directory survives cleanup and checkouts.
pub const SENTINEL: &str = ".gitkeep";

const BUILD_PREFIX: &str = ".build-";

/// Root directory of published archives and in-flight builds.
#[derive(Debug, Clone)]
pub struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root if needed.
    pub fn ensure(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root)
    }

    /// Fresh private build directory, removed when dropped.
    pub fn build_dir(&self) -> io::Result<TempDir> {
        tempfile::Builder::new()
            .prefix(BUILD_PREFIX)
            .tempdir_in(&self.root)
    }

    /// Write `file_name` under the root through `write`, atomically.
    pub fn publish<F>(&self, file_name: &str, write: F) -> Result<PathBuf>
    where
        F: FnOnce(&mut dyn Write) -> Result<()>,
    {
        let path = self.root.join(file_name);
        write_atomic(&path, write)?;
        Ok(path)
    }

    /// Remove published files and abandoned build directories older than
    /// `max_age`. The sentinel is always kept. Returns the number of entries
    /// removed.
    pub fn sweep(&self, max_age: Duration) -> io::Result<usize> {
        let now = SystemTime::now();
        let mut removed = 0;

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name == SENTINEL {
                continue;
            }

            let metadata = entry.metadata()?;
            let age = metadata
                .modified()
                .ok()
                .and_then(|mtime| now.duration_since(mtime).ok())
                .unwrap_or_default();
            if age <= max_age {
                continue;
            }

            let outcome = if metadata.is_dir() {
                if !name.starts_with(BUILD_PREFIX) {
                    continue;
                }
                fs::remove_dir_all(entry.path())
            } else {
                fs::remove_file(entry.path())
            };

            match outcome {
                Ok(()) => removed += 1,
                Err(err) => {
                    tracing::warn!(path = %entry.path().display(), error = %err, "failed to remove stale export");
                }
            }
        }

        if removed > 0 {
            tracing::debug!(root = %self.root.display(), removed, "swept scratch directory");
        }
        Ok(removed)
    }
}

/// Write `path` through a sibling temporary file renamed into place.
///
/// A missing parent directory fails with `io::ErrorKind::NotFound`; it is not
/// created here.
pub fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> Result<()>,
{
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    if !parent.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("directory not found: {}", parent.display()),
        )
        .into());
    }

    let tmp = tempfile::Builder::new()
        .prefix(".tmp-")
        .tempfile_in(parent)?;
    {
        let mut out = BufWriter::new(tmp.as_file());
        write(&mut out)?;
        out.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
