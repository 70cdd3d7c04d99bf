//! Application layer messages between the orchestrator and a worker.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Flat tensors of the model state, in layer order.
pub type Tensors = Vec<Vec<f32>>;

/// Scalar metrics reported alongside a result.
pub type Metrics = BTreeMap<String, f64>;

/// Metric keys shared by both ends of the RPC contract.
///
/// The orchestrator stamps the outer pair around each dispatched
/// call; the worker stamps the inner pair around its actual compute.
/// All four are unix seconds.
pub mod metric {
    pub const ROUND_START_TIME: &str = "round_start_time";
    pub const COMPUTE_START_TIME: &str = "compute_start_time";
    pub const COMPUTE_FINISH_TIME: &str = "compute_finish_time";
    pub const ROUND_FINISH_TIME: &str = "round_finish_time";
}

/// A request issued by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Request {
    /// Ask the worker for its property map (id, device, ip, mac, ...).
    GetProperties,
    /// Perform one unit of work on the given state.
    Fit {
        weights: Tensors,
        round: u32,
        batch_size: usize,
        epochs: usize,
    },
    /// Evaluate the given state against the worker's local data.
    Evaluate { weights: Tensors },
}

/// A worker's answer to a `Request`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Response {
    Properties(BTreeMap<String, String>),
    Fit {
        weights: Tensors,
        num_examples: u64,
        metrics: Metrics,
    },
    Evaluate {
        loss: f64,
        metrics: Metrics,
    },
    /// The worker could not serve the request.
    Err(String),
}
