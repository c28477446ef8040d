//! Live replay of sliced bundles against a prediction endpoint.

pub mod client;
pub mod error;
pub mod replay;
pub mod scheduler;

pub use client::{PredictionClient, Submission};
pub use error::{PredictionError, ReplayError, SchedulerError, TaskError};
pub use replay::{discover_slices, replay, replay_slice, ReplaySummary, SliceDir, SliceOutcome};
pub use scheduler::{
    CancelSignal, ScheduledTask, Scheduler, TaskState, DEFAULT_WORKERS, MAX_WORKERS,
};
