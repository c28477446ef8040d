//! Sequential batch run: every input bundle is sliced and written to disk.

use std::fs;
use std::path::Path;

use serde::Serialize;
use timeslice_core::{InputFilter, SliceError};

use crate::bundle::Bundle;
use crate::input::list_bundle_files;
use crate::partition::partition_bundle;
use crate::writer::SnapshotWriter;

/// Counters reported at the end of a batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub files_seen: usize,
    pub bundles_sliced: usize,
    pub files_skipped: usize,
    pub snapshots_written: usize,
}

/// Slice every accepted file of `input` into `writer`'s root.
///
/// Files that are not usable patient bundles are logged and skipped. I/O
/// failures stop the run.
pub fn run_batch(
    input: &Path,
    writer: &SnapshotWriter,
    filter: &InputFilter,
) -> Result<BatchSummary, SliceError> {
    let files = list_bundle_files(input, filter)?;
    tracing::info!(
        input = %input.display(),
        output = %writer.root().display(),
        files = files.len(),
        "Starting batch slicing"
    );

    let mut summary = BatchSummary::default();
    for path in &files {
        summary.files_seen += 1;
        match slice_file(path, writer) {
            Ok(written) => {
                summary.bundles_sliced += 1;
                summary.snapshots_written += written;
            }
            Err(err) if err.is_recoverable() => {
                summary.files_skipped += 1;
                tracing::warn!(file = %path.display(), reason = %err, "Skipping file");
            }
            Err(err) => return Err(err),
        }
    }

    tracing::info!(
        files = summary.files_seen,
        sliced = summary.bundles_sliced,
        skipped = summary.files_skipped,
        snapshots = summary.snapshots_written,
        "Batch slicing finished"
    );
    Ok(summary)
}

/// Read, partition and write one bundle file. Returns the snapshot count.
///
/// Bytes that are not valid UTF-8 are replaced with U+FFFD before parsing.
pub fn slice_file(path: &Path, writer: &SnapshotWriter) -> Result<usize, SliceError> {
    let bytes = fs::read(path).map_err(|err| SliceError::io(path, err))?;
    let bundle: Bundle = String::from_utf8_lossy(&bytes).parse()?;
    slice_bundle(&bundle, writer)
}

pub fn slice_bundle(bundle: &Bundle, writer: &SnapshotWriter) -> Result<usize, SliceError> {
    let partition = partition_bundle(bundle)?;
    for snapshot in &partition.snapshots {
        writer.write(snapshot)?;
    }

    tracing::info!(
        patient = partition.patient_id,
        snapshots = partition.snapshots.len(),
        "Sliced patient bundle"
    );
    Ok(partition.snapshots.len())
}
