//! Error types for live replay

use thiserror::Error;
use timeslice_core::SliceError;

/// Why a single prediction request did not produce a stored result.
#[derive(Error, Debug)]
pub enum PredictionError {
    #[error("prediction endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request to prediction endpoint timed out")]
    Timeout,

    #[error("HTTP error calling prediction endpoint: {0}")]
    Transport(#[source] reqwest::Error),
}

impl From<reqwest::Error> for PredictionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(err)
        }
    }
}

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("scheduler is shut down")]
    ShutDown,

    #[error(transparent)]
    InvalidInstant(#[from] SliceError),
}

/// Outcome of a scheduled task that did not complete.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("task was cancelled before it started")]
    Cancelled,

    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("task failed: {0:#}")]
    Failed(anyhow::Error),
}

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error(transparent)]
    Slice(#[from] SliceError),

    #[error("could not build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("{failed} of {total} replay tasks failed")]
    TasksFailed { failed: usize, total: usize },
}
