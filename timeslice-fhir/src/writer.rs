//! Persists snapshots under `<root>/<timestamp>/<patient>.bundle.json`.

use std::fs;
use std::path::{Path, PathBuf};

use timeslice_core::{SliceError, SnapshotKey};

use crate::partition::Snapshot;

#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    root: PathBuf,
}

impl SnapshotWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every patient's snapshot for one timestamp.
    pub fn slice_dir(&self, key: &SnapshotKey) -> PathBuf {
        self.root.join(key.directory_name())
    }

    pub fn snapshot_path(&self, key: &SnapshotKey) -> PathBuf {
        self.slice_dir(key).join(key.bundle_file_name())
    }

    /// Write one snapshot, replacing any previous file at the same path.
    pub fn write(&self, snapshot: &Snapshot<'_>) -> Result<PathBuf, SliceError> {
        let dir = self.slice_dir(snapshot.key());
        fs::create_dir_all(&dir).map_err(|err| SliceError::io(&dir, err))?;

        let path = dir.join(snapshot.key().bundle_file_name());
        let payload = snapshot.to_json()?;
        fs::write(&path, payload).map_err(|err| SliceError::io(&path, err))?;

        tracing::debug!(
            path = %path.display(),
            observations = snapshot.observation_count(),
            "Wrote snapshot"
        );
        Ok(path)
    }
}
