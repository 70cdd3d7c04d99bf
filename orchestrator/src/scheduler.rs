//! The round state machine driving a whole run.
//!
//! INIT → (SAMPLE → DISPATCH → COLLECT → AGGREGATE → EVALUATE →
//! LOG) × R → DONE. Rounds are strictly sequential; everything that
//! can fail inside a round is demoted to a log entry and a failure
//! record, so a run always completes its configured rounds.

use std::sync::Arc;

use comms::{RelayHandle, event::MessageType, msg::Metrics};
use log::{info, warn};
use serde_json::json;

use crate::{
    aggregate,
    client::WorkerClient,
    config::RunConfig,
    directory::{Criterion, Directory},
    dispatch::Dispatcher,
    error::{AggregateError, OrchestratorError},
    history::{History, RoundSummary},
    state::{FailureCause, GlobalState, Instruction, RoundConfig},
    timing::{TimingLog, TimingRecord},
};

/// Centralized evaluation of the global state, an external
/// collaborator. `()` is the no-op evaluator.
#[trait_variant::make(Evaluator: Send)]
pub trait EvaluatorTemplate {
    /// # Returns
    /// `(loss, metrics)`, or `None` if evaluation is unavailable.
    async fn evaluate(&self, state: &GlobalState) -> Option<(f64, Metrics)>;
}

impl Evaluator for () {
    async fn evaluate(&self, _state: &GlobalState) -> Option<(f64, Metrics)> {
        None
    }
}

/// Evaluates through one worker's `evaluate` RPC.
pub struct ClientEvaluator<C> {
    client: Arc<C>,
}

impl<C> ClientEvaluator<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self { client }
    }
}

impl<C: WorkerClient + Sync> Evaluator for ClientEvaluator<C> {
    async fn evaluate(&self, state: &GlobalState) -> Option<(f64, Metrics)> {
        match self.client.evaluate(state).await {
            Ok(result) => Some(result),
            Err(e) => {
                warn!("centralized evaluation failed: {e}");
                None
            }
        }
    }
}

/// The top-level coordinator, composed of injected parts.
pub struct Scheduler<C: WorkerClient, E: Evaluator = ()> {
    config: RunConfig,
    directory: Arc<Directory<C>>,
    dispatcher: Dispatcher,
    relay: RelayHandle,
    timing_log: TimingLog,
    evaluator: Option<E>,
    criterion: Option<Box<dyn Criterion + Send + Sync>>,
}

impl<C: WorkerClient + Send + Sync + 'static> Scheduler<C, ()> {
    /// Validates the configuration and assembles the scheduler.
    ///
    /// # Errors
    /// `InvalidConfig` for a configuration no run should start with.
    pub fn new(
        config: RunConfig,
        directory: Arc<Directory<C>>,
        relay: RelayHandle,
        timing_log: TimingLog,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;
        let dispatcher = Dispatcher::new(config.dispatch_concurrency, config.call_deadline);

        Ok(Self {
            config,
            directory,
            dispatcher,
            relay,
            timing_log,
            evaluator: None,
            criterion: None,
        })
    }
}

impl<C: WorkerClient + Send + Sync + 'static, E: Evaluator> Scheduler<C, E> {
    pub fn with_evaluator<E2: Evaluator>(self, evaluator: E2) -> Scheduler<C, E2> {
        Scheduler {
            config: self.config,
            directory: self.directory,
            dispatcher: self.dispatcher,
            relay: self.relay,
            timing_log: self.timing_log,
            evaluator: Some(evaluator),
            criterion: self.criterion,
        }
    }

    pub fn with_criterion(mut self, criterion: Box<dyn Criterion + Send + Sync>) -> Self {
        self.criterion = Some(criterion);
        self
    }

    /// Runs all configured rounds and returns the history, which has
    /// one entry per round plus the initial entry.
    pub async fn run(&mut self, initial: GlobalState) -> History {
        let mut state = initial;
        let mut history = History::default();

        info!("[init] starting run: {} round(s)", self.config.num_rounds);
        let initial_eval = self.evaluate(&state).await;
        if let Some((loss, _)) = &initial_eval {
            info!("initial state loss: {loss}");
        }
        history.push(RoundSummary {
            round: 0,
            loss: initial_eval.as_ref().map(|(l, _)| *l),
            metrics: initial_eval.map(|(_, m)| m).unwrap_or_default(),
            ..Default::default()
        });

        for round in 1..=self.config.num_rounds {
            let summary = self.fit_round(round, &mut state).await;
            history.push(summary);
        }

        info!("[done] finished at state version {}", state.version);
        history
    }

    async fn fit_round(&mut self, round: u32, state: &mut GlobalState) -> RoundSummary {
        info!("[round {round}]");

        // SAMPLE
        let sampled = match self
            .directory
            .sample(
                self.config.workers_per_round,
                self.config.min_workers_per_round,
                self.criterion.as_deref(),
                self.config.sample_timeout,
            )
            .await
        {
            Ok(sampled) => sampled,
            Err(e) => {
                warn!("round {round} aborted: {e}");
                return RoundSummary {
                    round,
                    ..Default::default()
                };
            }
        };

        let roster: Vec<String> = sampled.iter().map(|w| w.profile.id.clone()).collect();
        info!(
            "sampled {} worker(s) out of {}",
            roster.len(),
            self.directory.num_available().await
        );
        self.relay.send(MessageType::Roster, json!(roster));

        // DISPATCH / COLLECT
        let shared = Arc::new(state.clone());
        let instructions = sampled
            .into_iter()
            .map(|worker| {
                let instruction = Instruction {
                    state: Arc::clone(&shared),
                    config: RoundConfig {
                        round,
                        batch_size: self.config.batch_size,
                        epochs: self.config.epochs,
                    },
                };
                (worker, instruction)
            })
            .collect();
        let outcome = self.dispatcher.dispatch_all(instructions).await;
        info!(
            "round {round}: {} result(s), {} failure(s)",
            outcome.successes.len(),
            outcome.failures.len()
        );

        // A dead connection means the worker left the population.
        for failure in &outcome.failures {
            if matches!(failure.cause, FailureCause::Transport(_)) {
                self.directory.unregister(&failure.worker_id).await;
            }
        }

        // AGGREGATE
        match aggregate::aggregate(&outcome.successes) {
            Ok(tensors) => {
                state.tensors = tensors;
                state.version = u64::from(round);
            }
            Err(AggregateError::NoData) => {
                info!("round {round} aggregated zero results, state stays at v{}", state.version);
            }
            Err(e) => warn!("round {round} aggregation failed: {e}, state stays at v{}", state.version),
        }

        // EVALUATE
        let evaluated = self.evaluate(state).await;
        if let Some((loss, metrics)) = &evaluated {
            info!("round {round} evaluation: loss={loss} metrics={metrics:?}");
        }

        // LOG
        for result in &outcome.successes {
            match TimingRecord::from_metrics(round, &result.worker_id, &result.metrics) {
                Some(record) => self.timing_log.append(&record),
                None => warn!("worker {} reported no timing metrics", result.worker_id),
            }
        }

        RoundSummary {
            round,
            sampled: roster,
            num_successes: outcome.successes.len(),
            num_failures: outcome.failures.len(),
            loss: evaluated.as_ref().map(|(l, _)| *l),
            metrics: evaluated.map(|(_, m)| m).unwrap_or_default(),
        }
    }

    async fn evaluate(&self, state: &GlobalState) -> Option<(f64, Metrics)> {
        match &self.evaluator {
            Some(evaluator) => evaluator.evaluate(state).await,
            None => None,
        }
    }
}
