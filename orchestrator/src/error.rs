use std::{fmt, io};

use crate::state::{FailureCause, FailureRecord, WorkerId};

/// Fatal errors: these are raised before any round starts and
/// terminate the run. Everything that happens inside a round is
/// converted into log entries and failure records instead.
#[derive(Debug)]
pub enum OrchestratorError {
    /// Invalid configuration, caught before `INIT`.
    InvalidConfig(String),
    /// An underlying I/O error during startup (bind, log file, relay).
    Io(io::Error),
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for OrchestratorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for OrchestratorError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// `sample` could not reach the required availability in time.
/// Round-local and recoverable: the round is skipped.
#[derive(Debug)]
pub struct InsufficientWorkers {
    pub available: usize,
    pub required: usize,
}

impl fmt::Display for InsufficientWorkers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "insufficient workers: {} available, {} required",
            self.available, self.required
        )
    }
}

impl std::error::Error for InsufficientWorkers {}

/// Aggregation-local errors; the caller keeps the previous state.
#[derive(Debug)]
pub enum AggregateError {
    /// No successes (or no weight) to aggregate.
    NoData,
    /// A result's tensor shapes disagree with the rest.
    ShapeMismatch { worker_id: WorkerId },
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoData => write!(f, "no data to aggregate"),
            Self::ShapeMismatch { worker_id } => {
                write!(f, "tensor shape mismatch from worker {worker_id}")
            }
        }
    }
}

impl std::error::Error for AggregateError {}

/// A single remote call to a worker failed.
#[derive(Debug)]
pub enum ClientError {
    Io(io::Error),
    /// The worker answered with an application-level error.
    Remote(String),
    TimedOut,
}

impl ClientError {
    /// Tags the failure for collection and aggregation.
    pub fn into_failure(self, worker_id: WorkerId) -> FailureRecord {
        let cause = match self {
            Self::Io(e) => FailureCause::Transport(e.to_string()),
            Self::Remote(msg) => FailureCause::Worker(msg),
            Self::TimedOut => FailureCause::TimedOut,
        };
        FailureRecord { worker_id, cause }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Remote(msg) => write!(f, "remote error: {msg}"),
            Self::TimedOut => write!(f, "call timed out"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ClientError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
