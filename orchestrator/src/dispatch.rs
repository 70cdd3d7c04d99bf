//! Bounded-concurrency fan-out/fan-in over the selected workers.

use std::{num::NonZeroUsize, time::Duration};

use comms::{event::unix_secs, msg::metric};
use futures::{StreamExt, stream};
use log::warn;

use crate::{
    client::WorkerClient,
    directory::SampledWorker,
    error::ClientError,
    state::{FailureRecord, Instruction, WorkResult},
};

/// The partition a round's collection resolves to.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    pub successes: Vec<WorkResult>,
    pub failures: Vec<FailureRecord>,
}

/// Issues one remote call per worker and waits for all of them.
pub struct Dispatcher {
    concurrency: Option<NonZeroUsize>,
    call_deadline: Option<Duration>,
}

impl Dispatcher {
    /// # Arguments
    /// * `concurrency` - Pool size for concurrent calls; `None` runs
    ///   every instruction at once.
    /// * `call_deadline` - Optional bound per call; `None` waits
    ///   indefinitely (a stuck worker stalls the round).
    pub fn new(concurrency: Option<NonZeroUsize>, call_deadline: Option<Duration>) -> Self {
        Self {
            concurrency,
            call_deadline,
        }
    }

    /// Runs every instruction and returns only once all of them have
    /// completed or failed. No partial return: this is the round's
    /// wait-all barrier. An individual failure becomes a
    /// `FailureRecord` and never cancels sibling calls.
    pub async fn dispatch_all<C: WorkerClient>(
        &self,
        instructions: Vec<(SampledWorker<C>, Instruction)>,
    ) -> DispatchOutcome {
        let pool = self
            .concurrency
            .map(NonZeroUsize::get)
            .unwrap_or_else(|| instructions.len().max(1));

        let results: Vec<Result<WorkResult, FailureRecord>> = stream::iter(instructions)
            .map(|(worker, instruction)| self.call_one(worker, instruction))
            .buffer_unordered(pool)
            .collect()
            .await;

        let mut outcome = DispatchOutcome::default();
        for result in results {
            match result {
                Ok(work) => outcome.successes.push(work),
                Err(failure) => outcome.failures.push(failure),
            }
        }
        outcome
    }

    async fn call_one<C: WorkerClient>(
        &self,
        worker: SampledWorker<C>,
        instruction: Instruction,
    ) -> Result<WorkResult, FailureRecord> {
        let worker_id = worker.profile.id.clone();

        // Stamped here, independent of whatever the worker reports.
        let started = unix_secs();
        let result = match self.call_deadline {
            Some(deadline) => {
                match tokio::time::timeout(deadline, worker.client.do_work(&instruction)).await {
                    Ok(result) => result,
                    Err(_) => Err(ClientError::TimedOut),
                }
            }
            None => worker.client.do_work(&instruction).await,
        };
        let finished = unix_secs();

        match result {
            Ok(mut work) => {
                work.metrics
                    .insert(metric::ROUND_START_TIME.to_string(), started);
                work.metrics
                    .insert(metric::ROUND_FINISH_TIME.to_string(), finished);
                Ok(work)
            }
            Err(e) => {
                warn!("work on {worker_id} failed: {e}");
                Err(e.into_failure(worker_id))
            }
        }
    }
}
