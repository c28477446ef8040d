//! Live replay: each slice directory is submitted at the instant its name encodes.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use timeslice_core::{ReplayInstant, SliceError, BUNDLE_SUFFIX};
use timeslice_fhir::{find_patient_id, Bundle};

use crate::client::{PredictionClient, Submission};
use crate::error::{ReplayError, TaskError};
use crate::scheduler::{CancelSignal, Scheduler};

/// A directory of snapshots sharing one timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceDir {
    pub path: PathBuf,
    pub instant: ReplayInstant,
}

/// Counts for one replayed slice directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SliceOutcome {
    pub stored: usize,
    pub skipped: usize,
    /// Shutdown was requested before every file was submitted.
    pub interrupted: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub slices: usize,
    pub completed: usize,
    pub cancelled: usize,
    pub failed: usize,
    pub stored: usize,
    pub skipped: usize,
}

/// Subdirectories of `root` whose names parse as replay instants, in time order.
pub fn discover_slices(root: &Path) -> Result<Vec<SliceDir>, SliceError> {
    if !root.is_dir() {
        return Err(SliceError::InputNotFound(root.to_path_buf()));
    }

    let mut slices = Vec::new();
    for entry in fs::read_dir(root).map_err(|err| SliceError::io(root, err))? {
        let path = entry.map_err(|err| SliceError::io(root, err))?.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };

        match ReplayInstant::from_name(name) {
            Ok(instant) => slices.push(SliceDir { path, instant }),
            Err(err) => {
                tracing::warn!(dir = %path.display(), error = %err, "Ignoring directory");
            }
        }
    }

    slices.sort_by(|a, b| a.instant.cmp(&b.instant).then_with(|| a.path.cmp(&b.path)));
    Ok(slices)
}

/// Schedule every slice under `root` and wait for all of them.
///
/// Fails if a slice could not be scheduled or any slice task failed, in both
/// cases after every scheduled task has finished.
pub async fn replay(
    root: &Path,
    client: Arc<PredictionClient>,
    scheduler: &Scheduler,
) -> Result<ReplaySummary, ReplayError> {
    let slices = discover_slices(root)?;
    tracing::info!(
        root = %root.display(),
        slices = slices.len(),
        workers = scheduler.workers(),
        endpoint = client.endpoint(),
        "Starting live replay"
    );

    let mut handles = Vec::with_capacity(slices.len());
    let mut rejected = None;
    for slice in slices {
        let client = Arc::clone(&client);
        let dir = slice.path.clone();
        let scheduled = scheduler.schedule_at(slice.instant, move |signal| {
            replay_slice(dir, client, signal)
        });
        match scheduled {
            Ok(handle) => {
                tracing::debug!(
                    dir = %slice.path.display(),
                    instant = %slice.instant,
                    "Scheduled slice"
                );
                handles.push((slice, handle));
            }
            Err(err) => {
                tracing::error!(
                    dir = %slice.path.display(),
                    error = %err,
                    "Could not schedule slice"
                );
                rejected = Some(err);
                break;
            }
        }
    }

    let mut summary = ReplaySummary {
        slices: handles.len(),
        ..ReplaySummary::default()
    };
    for (slice, handle) in handles {
        match handle.join().await {
            Ok(outcome) => {
                summary.completed += 1;
                summary.stored += outcome.stored;
                summary.skipped += outcome.skipped;
            }
            Err(TaskError::Cancelled) => {
                summary.cancelled += 1;
                tracing::warn!(dir = %slice.path.display(), "Slice cancelled before it started");
            }
            Err(err) => {
                summary.failed += 1;
                tracing::error!(dir = %slice.path.display(), error = %err, "Slice failed");
            }
        }
    }

    tracing::info!(
        completed = summary.completed,
        cancelled = summary.cancelled,
        failed = summary.failed,
        stored = summary.stored,
        skipped = summary.skipped,
        "Live replay finished"
    );

    if let Some(err) = rejected {
        return Err(err.into());
    }
    if summary.failed > 0 {
        return Err(ReplayError::TasksFailed {
            failed: summary.failed,
            total: summary.slices,
        });
    }
    Ok(summary)
}

/// Submit every snapshot of one slice directory, one request at a time.
pub async fn replay_slice(
    dir: PathBuf,
    client: Arc<PredictionClient>,
    signal: CancelSignal,
) -> anyhow::Result<SliceOutcome> {
    let mut outcome = SliceOutcome::default();

    for path in snapshot_files(&dir).await? {
        if signal.is_cancelled() {
            outcome.interrupted = true;
            tracing::info!(dir = %dir.display(), "Shutdown requested, leaving slice early");
            break;
        }

        let payload = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read snapshot {}", path.display()))?;
        let bundle: Bundle = match payload.parse() {
            Ok(bundle) => bundle,
            Err(err) => {
                tracing::warn!(file = %path.display(), error = %err, "Skipping unreadable snapshot");
                outcome.skipped += 1;
                continue;
            }
        };

        let patient_id = find_patient_id(&bundle)
            .map(str::to_string)
            .unwrap_or_else(|| patient_from_file_name(&path));

        match client.submit(&patient_id, payload, &dir).await? {
            Submission::Stored(_) => outcome.stored += 1,
            Submission::Skipped => outcome.skipped += 1,
        }
    }

    Ok(outcome)
}

async fn snapshot_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("failed to list {}", dir.display()))?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_snapshot = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(BUNDLE_SUFFIX));
        if is_snapshot {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

fn patient_from_file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.strip_suffix(BUNDLE_SUFFIX).unwrap_or(name).to_string())
        .unwrap_or_default()
}
