//! Enumerates candidate bundle files in an input directory.

use std::fs;
use std::path::{Path, PathBuf};

use timeslice_core::{InputFilter, SliceError};

/// Regular files in `dir` accepted by `filter`, sorted by file name.
pub fn list_bundle_files(dir: &Path, filter: &InputFilter) -> Result<Vec<PathBuf>, SliceError> {
    if !dir.is_dir() {
        return Err(SliceError::InputNotFound(dir.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|err| SliceError::io(dir, err))? {
        let entry = entry.map_err(|err| SliceError::io(dir, err))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let accepted = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| filter.accepts(name));
        if accepted {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}
