//! Core data model for a federated run.

use std::{fmt, sync::Arc};

use comms::msg::{Metrics, Tensors};
use serde::{Deserialize, Serialize};

pub type WorkerId = String;

/// The global model state owned by the scheduler.
///
/// `version` equals the index of the last completed round that
/// aggregated at least one success; it never moves otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalState {
    pub tensors: Tensors,
    pub version: u64,
}

impl GlobalState {
    pub fn new(tensors: Tensors) -> Self {
        Self {
            tensors,
            version: 0,
        }
    }

    /// Zero-initialized state with one flat tensor per entry of `shape`.
    pub fn zeros(shape: &[usize]) -> Self {
        Self::new(shape.iter().map(|&n| vec![0.0; n]).collect())
    }
}

/// Per-round parameters attached to every work instruction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RoundConfig {
    pub round: u32,
    pub batch_size: usize,
    pub epochs: usize,
}

/// One unit of work for one worker. The state is shared, not cloned,
/// across the instructions of a round.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub state: Arc<GlobalState>,
    pub config: RoundConfig,
}

/// A successful unit of work reported by a worker.
#[derive(Debug, Clone)]
pub struct WorkResult {
    pub worker_id: WorkerId,
    pub tensors: Tensors,
    /// Example count, the aggregation weight.
    pub num_examples: u64,
    pub metrics: Metrics,
}

/// Why a worker's unit of work did not produce a result.
#[derive(Debug, Clone)]
pub enum FailureCause {
    /// The connection to the worker is gone.
    Transport(String),
    /// The worker answered, but with an error.
    Worker(String),
    /// The per-call deadline expired.
    TimedOut,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Worker(msg) => write!(f, "worker: {msg}"),
            Self::TimedOut => write!(f, "timed out"),
        }
    }
}

/// One recorded per-worker failure for a round.
#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub worker_id: WorkerId,
    pub cause: FailureCause,
}
