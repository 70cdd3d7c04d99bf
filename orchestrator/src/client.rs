//! The RPC contract towards a remote training worker.

use std::{collections::BTreeMap, time::Duration};

use comms::msg::Metrics;

use crate::{
    error::ClientError,
    state::{GlobalState, Instruction, WorkResult},
};

/// A handle to one remote training worker.
///
/// The content of the work itself is opaque to the orchestration
/// core; this trait is its fixed contract.
#[trait_variant::make(WorkerClient: Send)]
pub trait WorkerClientTemplate {
    /// Asks the worker for its property map (short id, device, ip, mac).
    ///
    /// # Arguments
    /// * `timeout` - Bound on the discovery call.
    async fn discover_properties(
        &self,
        timeout: Duration,
    ) -> Result<BTreeMap<String, String>, ClientError>;

    /// Performs one unit of work on the instruction's state.
    async fn do_work(&self, instruction: &Instruction) -> Result<WorkResult, ClientError>;

    /// Evaluates the given state against the worker's local data.
    async fn evaluate(&self, state: &GlobalState) -> Result<(f64, Metrics), ClientError>;
}
