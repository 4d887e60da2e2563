// src/store/file.rs

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::errors::{ProvisorError, Result};
use crate::store::{CheckpointSnapshot, StateStore};

/// Stores the checkpoint as pretty-printed JSON at a fixed path.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<Option<CheckpointSnapshot>> {
        if !self.path.exists() {
            debug!(path = ?self.path, "no checkpoint found");
            return Ok(None);
        }

        let bytes = fs::read(&self.path).map_err(|e| {
            ProvisorError::Persistence(format!("reading checkpoint {:?}: {e}", self.path))
        })?;
        let snapshot: CheckpointSnapshot = serde_json::from_slice(&bytes).map_err(|e| {
            ProvisorError::Persistence(format!("parsing checkpoint {:?}: {e}", self.path))
        })?;

        info!(
            path = ?self.path,
            modules = snapshot.statuses.len(),
            rollback_entries = snapshot.rollback.len(),
            "loaded checkpoint"
        );
        Ok(Some(snapshot))
    }

    fn save(&mut self, snapshot: &CheckpointSnapshot) -> Result<()> {
        let data = serde_json::to_vec_pretty(snapshot).map_err(|e| {
            ProvisorError::Persistence(format!("serializing checkpoint: {e}"))
        })?;
        atomic_write(&self.path, &data).map_err(|e| {
            ProvisorError::Persistence(format!("writing checkpoint {:?}: {e}", self.path))
        })?;
        debug!(path = ?self.path, bytes = data.len(), "checkpoint saved");
        Ok(())
    }
}

/// Atomically write `data` to `path` using a tempfile in the same directory.
fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
