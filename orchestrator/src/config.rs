//! The configuration surface of a run.

use std::{num::NonZeroUsize, time::Duration};

use crate::error::OrchestratorError;

/// Endpoints of the event relay: where worker-originated frames come
/// in, and where the downstream observer listens.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind_addr: String,
    pub connect_addr: String,
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Number of rounds to run.
    pub num_rounds: u32,
    /// How many workers to sample each round.
    pub workers_per_round: usize,
    /// Below this availability a round is aborted.
    pub min_workers_per_round: usize,
    pub batch_size: usize,
    pub epochs: usize,
    /// Fan-out pool size for dispatch; `None` means one slot per
    /// instruction (unbounded).
    pub dispatch_concurrency: Option<NonZeroUsize>,
    /// Fan-out pool size for property discovery during `sample`.
    pub discovery_concurrency: NonZeroUsize,
    /// Bound on a single property-discovery call.
    pub discovery_timeout: Duration,
    /// How long `sample` waits for `min_workers_per_round`
    /// availability before aborting the round.
    pub sample_timeout: Duration,
    /// Optional per-call deadline for dispatched work. `None` keeps
    /// the unbounded wait-all barrier; a stuck worker then stalls the
    /// round.
    pub call_deadline: Option<Duration>,
    pub relay: Option<RelayConfig>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            num_rounds: 5,
            workers_per_round: 2,
            min_workers_per_round: 2,
            batch_size: 32,
            epochs: 1,
            dispatch_concurrency: None,
            discovery_concurrency: NonZeroUsize::new(8).unwrap(),
            discovery_timeout: Duration::from_secs(10),
            sample_timeout: Duration::from_secs(60),
            call_deadline: None,
            relay: None,
        }
    }
}

impl RunConfig {
    /// Rejects configurations no run should start with.
    ///
    /// # Errors
    /// `InvalidConfig` naming the offending field; fatal before `INIT`.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.num_rounds == 0 {
            return Err(invalid("num_rounds must be positive"));
        }
        if self.workers_per_round == 0 {
            return Err(invalid("workers_per_round must be positive"));
        }
        if self.min_workers_per_round == 0 {
            return Err(invalid("min_workers_per_round must be positive"));
        }
        if self.min_workers_per_round > self.workers_per_round {
            return Err(invalid(&format!(
                "min_workers_per_round ({}) exceeds workers_per_round ({})",
                self.min_workers_per_round, self.workers_per_round
            )));
        }
        if self.batch_size == 0 {
            return Err(invalid("batch_size must be positive"));
        }
        if self.epochs == 0 {
            return Err(invalid("epochs must be positive"));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> OrchestratorError {
    OrchestratorError::InvalidConfig(msg.to_string())
}
