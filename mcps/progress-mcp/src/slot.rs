//! File-backed single-slot ephemeral cache
//!
//! Holds a JSON snapshot of the most recently mutated instance. Writes go to a
//! sibling temp file first and are renamed into place, so a crash mid-write
//! leaves the previous snapshot intact.

use chrono::Utc;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use progress_core::{EphemeralCache, EphemeralSnapshot, StoreError, WorkflowInstance};

pub struct FileSlotCache {
    path: PathBuf,
}

impl FileSlotCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn io_error(e: std::io::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

impl EphemeralCache for FileSlotCache {
    fn read(&self) -> Result<Option<EphemeralSnapshot>, StoreError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(e)),
        };

        Ok(Some(serde_json::from_str(&content)?))
    }

    fn write(&self, instance: &WorkflowInstance) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }

        let snapshot = EphemeralSnapshot {
            instance: instance.clone(),
            captured_at: Utc::now(),
        };
        let content = serde_json::to_string(&snapshot)?;

        let temp = self.temp_path();
        std::fs::write(&temp, content).map_err(io_error)?;
        std::fs::rename(&temp, &self.path).map_err(io_error)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(e)),
        }
    }
}
