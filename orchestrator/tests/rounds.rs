//! Whole-run tests over in-memory workers.

use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use comms::{
    RelayHandle,
    event::{MessageType, unix_secs},
    msg::{Metrics, metric},
};
use orchestrator::{
    Directory, GlobalState, RunConfig, Scheduler, WorkerClient,
    error::ClientError,
    scheduler::Evaluator,
    state::{Instruction, WorkResult},
    timing::TimingLog,
};

/// An in-memory worker: reports a constant tensor value with a fixed
/// example weight, and records the state version it saw per round.
#[derive(Clone)]
struct MemWorker {
    id: String,
    value: f32,
    weight: u64,
    failing: Arc<AtomicBool>,
    seen_versions: Arc<Mutex<Vec<(u32, u64)>>>,
}

impl MemWorker {
    fn new(id: &str, value: f32, weight: u64) -> Self {
        Self {
            id: id.to_string(),
            value,
            weight,
            failing: Arc::new(AtomicBool::new(false)),
            seen_versions: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl WorkerClient for MemWorker {
    async fn discover_properties(
        &self,
        _timeout: Duration,
    ) -> Result<BTreeMap<String, String>, ClientError> {
        Ok(BTreeMap::from([("cid".to_string(), self.id.clone())]))
    }

    async fn do_work(&self, instruction: &Instruction) -> Result<WorkResult, ClientError> {
        self.seen_versions
            .lock()
            .unwrap()
            .push((instruction.config.round, instruction.state.version));

        if self.failing.load(Ordering::SeqCst) {
            return Err(ClientError::Remote("compute exploded".into()));
        }

        let now = unix_secs();
        let mut metrics = Metrics::new();
        metrics.insert(metric::COMPUTE_START_TIME.to_string(), now);
        metrics.insert(metric::COMPUTE_FINISH_TIME.to_string(), now);
        metrics.insert("accuracy".to_string(), f64::from(self.value));

        Ok(WorkResult {
            worker_id: self.id.clone(),
            tensors: instruction
                .state
                .tensors
                .iter()
                .map(|t| vec![self.value; t.len()])
                .collect(),
            num_examples: self.weight,
            metrics,
        })
    }

    async fn evaluate(&self, state: &GlobalState) -> Result<(f64, Metrics), ClientError> {
        let loss = state
            .tensors
            .iter()
            .flatten()
            .map(|&v| f64::from(v))
            .sum::<f64>();
        Ok((loss, Metrics::new()))
    }
}

struct StateProbe;

impl Evaluator for StateProbe {
    async fn evaluate(&self, state: &GlobalState) -> Option<(f64, Metrics)> {
        let first = state
            .tensors
            .first()
            .and_then(|t| t.first())
            .copied()
            .unwrap_or(0.0);
        Some((f64::from(first), Metrics::new()))
    }
}

fn config(num_rounds: u32, workers_per_round: usize) -> RunConfig {
    RunConfig {
        num_rounds,
        workers_per_round,
        min_workers_per_round: workers_per_round.min(2),
        sample_timeout: Duration::from_millis(200),
        ..Default::default()
    }
}

async fn directory_with(
    relay: RelayHandle,
    workers: &[MemWorker],
) -> Arc<Directory<MemWorker>> {
    let directory = Arc::new(Directory::new(relay, Duration::from_secs(1), 4));
    for worker in workers {
        directory.register(worker.id.clone(), worker.clone()).await;
    }
    directory
}

#[tokio::test]
async fn five_rounds_make_a_history_of_six() {
    let workers = [
        MemWorker::new("w-0", 0.5, 10),
        MemWorker::new("w-1", 0.6, 20),
    ];
    let directory = directory_with(RelayHandle::disabled(), &workers).await;

    let mut scheduler = Scheduler::new(
        config(5, 2),
        directory,
        RelayHandle::disabled(),
        TimingLog::disabled(),
    )
    .unwrap();

    let history = scheduler.run(GlobalState::zeros(&[4])).await;
    assert_eq!(history.len(), 6);
    assert_eq!(history.rounds()[0].round, 0);
    assert_eq!(history.last().unwrap().round, 5);
}

#[tokio::test]
async fn weighted_aggregation_flows_into_the_next_round() {
    let workers = [
        MemWorker::new("w-0", 0.5, 10),
        MemWorker::new("w-1", 0.6, 20),
        MemWorker::new("w-2", 0.7, 30),
    ];
    let directory = directory_with(RelayHandle::disabled(), &workers).await;

    let mut scheduler = Scheduler::new(
        config(1, 3),
        directory,
        RelayHandle::disabled(),
        TimingLog::disabled(),
    )
    .unwrap()
    .with_evaluator(StateProbe);

    let history = scheduler.run(GlobalState::zeros(&[2])).await;

    // (10*0.5 + 20*0.6 + 30*0.7) / 60
    let expected = 19.0 / 30.0;
    let summary = history.last().unwrap();
    assert_eq!(summary.num_successes, 3);
    assert!((summary.loss.unwrap() - expected).abs() < 1e-6);
}

#[tokio::test]
async fn dispatched_instructions_carry_the_previous_rounds_version() {
    let workers = [
        MemWorker::new("w-0", 0.5, 10),
        MemWorker::new("w-1", 0.6, 20),
    ];
    let directory = directory_with(RelayHandle::disabled(), &workers).await;

    let mut scheduler = Scheduler::new(
        config(4, 2),
        directory,
        RelayHandle::disabled(),
        TimingLog::disabled(),
    )
    .unwrap();

    scheduler.run(GlobalState::zeros(&[1])).await;

    for worker in &workers {
        for &(round, version) in worker.seen_versions.lock().unwrap().iter() {
            assert_eq!(version, u64::from(round) - 1);
        }
    }
}

#[tokio::test]
async fn all_failures_leave_state_version_unchanged() {
    let workers = [
        MemWorker::new("w-0", 0.5, 10),
        MemWorker::new("w-1", 0.6, 20),
    ];
    for worker in &workers {
        worker.failing.store(true, Ordering::SeqCst);
    }
    let directory = directory_with(RelayHandle::disabled(), &workers).await;

    let mut scheduler = Scheduler::new(
        config(2, 2),
        directory,
        RelayHandle::disabled(),
        TimingLog::disabled(),
    )
    .unwrap()
    .with_evaluator(StateProbe);

    let history = scheduler.run(GlobalState::zeros(&[3])).await;

    for summary in &history.rounds()[1..] {
        assert_eq!(summary.num_successes, 0);
        assert_eq!(summary.num_failures, summary.sampled.len());
        assert_eq!(summary.sampled.len(), 2);
        // State stayed all zeros.
        assert_eq!(summary.loss, Some(0.0));
    }
}

#[tokio::test]
async fn empty_population_aborts_rounds_but_finishes_the_run() {
    let directory: Arc<Directory<MemWorker>> =
        Arc::new(Directory::new(RelayHandle::disabled(), Duration::from_secs(1), 4));

    let mut scheduler = Scheduler::new(
        config(3, 2),
        directory,
        RelayHandle::disabled(),
        TimingLog::disabled(),
    )
    .unwrap();

    let history = scheduler.run(GlobalState::zeros(&[1])).await;
    assert_eq!(history.len(), 4);
    for summary in &history.rounds()[1..] {
        assert!(summary.sampled.is_empty());
        assert_eq!(summary.num_successes, 0);
    }
}

#[tokio::test]
async fn roster_is_relayed_before_results_are_in() {
    let workers = [
        MemWorker::new("w-0", 0.5, 10),
        MemWorker::new("w-1", 0.6, 20),
    ];
    let (relay, mut events) = RelayHandle::pair("server");
    let directory = directory_with(relay.clone(), &workers).await;

    let mut scheduler =
        Scheduler::new(config(1, 2), directory, relay, TimingLog::disabled()).unwrap();
    scheduler.run(GlobalState::zeros(&[1])).await;

    // Discovery updates first (one per worker, any order), then the roster.
    let mut update_count = 0;
    loop {
        let event = events.recv().await.unwrap();
        if event.message_type == MessageType::UpdateDirectory as u8 {
            update_count += 1;
            continue;
        }
        assert_eq!(event.message_type, MessageType::Roster as u8);
        let roster: Vec<String> = serde_json::from_value(event.message).unwrap();
        assert_eq!(roster.len(), 2);
        break;
    }
    assert_eq!(update_count, 2);
}

#[tokio::test]
async fn invalid_config_is_fatal_before_init() {
    let directory: Arc<Directory<MemWorker>> =
        Arc::new(Directory::new(RelayHandle::disabled(), Duration::from_secs(1), 4));

    let result = Scheduler::new(
        RunConfig {
            num_rounds: 0,
            ..Default::default()
        },
        directory,
        RelayHandle::disabled(),
        TimingLog::disabled(),
    );
    assert!(result.is_err());
}
