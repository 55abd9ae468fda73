//! Filesystem liveness markers read by external health checks
//!
//! - `startup-completed` is written once every worker has its extractor
//! - `currently_processing-<worker>` exists while that worker runs a job and
//!   holds the job's start time and correlation id
//!
//! Markers are written to a temporary file and renamed into place, so a
//! reader never sees a partial marker.

use crate::error::Result;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Name of the marker written after startup
pub const STARTUP_MARKER: &str = "startup-completed";

/// Prefix of the per-worker processing markers
pub const PROCESSING_MARKER_PREFIX: &str = "currently_processing-";

/// Directory holding the markers of one server
#[derive(Debug, Clone)]
pub struct MarkerDir {
    dir: PathBuf,
}

impl MarkerDir {
    /// Use `dir`, creating it if needed
    pub fn create<P: Into<PathBuf>>(dir: P) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn startup_path(&self) -> PathBuf {
        self.dir.join(STARTUP_MARKER)
    }

    #[must_use]
    pub fn processing_path(&self, worker: usize) -> PathBuf {
        self.dir.join(format!("{PROCESSING_MARKER_PREFIX}{worker}"))
    }

    pub fn write_startup(&self) -> Result<()> {
        self.write_atomic(&self.startup_path(), &format!("{}\n", chrono::Utc::now().to_rfc3339()))
    }

    /// Mark `worker` busy with `correlation_id` until the guard is dropped
    pub fn processing(&self, worker: usize, correlation_id: &str) -> Result<ProcessingMarker> {
        let path = self.processing_path(worker);
        let contents = format!("{} {correlation_id}\n", chrono::Utc::now().to_rfc3339());
        self.write_atomic(&path, &contents)?;
        Ok(ProcessingMarker { path })
    }

    /// Remove the startup marker and any stale processing markers
    pub fn clear(&self) -> Result<()> {
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name == STARTUP_MARKER || name.starts_with(PROCESSING_MARKER_PREFIX) {
                remove_if_present(&entry.path())?;
            }
        }
        Ok(())
    }

    fn write_atomic(&self, path: &Path, contents: &str) -> Result<()> {
        let mut file = tempfile::NamedTempFile::new_in(&self.dir)?;
        file.write_all(contents.as_bytes())?;
        file.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

/// Removes its processing marker on drop
#[derive(Debug)]
pub struct ProcessingMarker {
    path: PathBuf,
}

impl ProcessingMarker {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ProcessingMarker {
    fn drop(&mut self) {
        if let Err(e) = remove_if_present(&self.path) {
            log::warn!("⚠️ Failed to remove marker {}: {e}", self.path.display());
        }
    }
}
