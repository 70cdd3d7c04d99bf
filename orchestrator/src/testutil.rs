//! In-memory worker client used by the unit tests.

use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use comms::{
    event::unix_secs,
    msg::{Metrics, metric},
};

use crate::{
    client::WorkerClient,
    error::ClientError,
    state::{GlobalState, Instruction, WorkResult},
};

#[derive(Clone, Debug)]
pub struct FakeClient {
    id: String,
    value: f32,
    weight: u64,
    fail_discovery: bool,
    fail_work: bool,
    discovery_delay: Duration,
    work_delay: Duration,
    discovery_calls: Option<Arc<AtomicUsize>>,
}

impl FakeClient {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            value: 1.0,
            weight: 1,
            fail_discovery: false,
            fail_work: false,
            discovery_delay: Duration::ZERO,
            work_delay: Duration::ZERO,
            discovery_calls: None,
        }
    }

    pub fn failing_discovery(mut self) -> Self {
        self.fail_discovery = true;
        self
    }

    pub fn failing_work(mut self) -> Self {
        self.fail_work = true;
        self
    }

    pub fn with_discovery_delay(mut self, delay: Duration) -> Self {
        self.discovery_delay = delay;
        self
    }

    pub fn with_work_delay(mut self, delay: Duration) -> Self {
        self.work_delay = delay;
        self
    }

    pub fn counting_discoveries(mut self, counter: Arc<AtomicUsize>) -> Self {
        self.discovery_calls = Some(counter);
        self
    }
}

impl WorkerClient for FakeClient {
    async fn discover_properties(
        &self,
        _timeout: Duration,
    ) -> Result<BTreeMap<String, String>, ClientError> {
        if let Some(counter) = &self.discovery_calls {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        if !self.discovery_delay.is_zero() {
            tokio::time::sleep(self.discovery_delay).await;
        }
        if self.fail_discovery {
            return Err(ClientError::Remote("discovery refused".into()));
        }

        Ok(BTreeMap::from([
            ("cid".to_string(), self.id.clone()),
            ("ip".to_string(), "10.0.0.1".to_string()),
        ]))
    }

    async fn do_work(&self, instruction: &Instruction) -> Result<WorkResult, ClientError> {
        if !self.work_delay.is_zero() {
            tokio::time::sleep(self.work_delay).await;
        }
        if self.fail_work {
            return Err(ClientError::Remote("work refused".into()));
        }

        let t = unix_secs();
        let mut metrics = Metrics::new();
        metrics.insert(metric::COMPUTE_START_TIME.to_string(), t);
        metrics.insert(metric::COMPUTE_FINISH_TIME.to_string(), t);
        metrics.insert("accuracy".to_string(), f64::from(self.value));

        Ok(WorkResult {
            worker_id: self.id.clone(),
            tensors: instruction
                .state
                .tensors
                .iter()
                .map(|t| t.iter().map(|_| self.value).collect())
                .collect(),
            num_examples: self.weight,
            metrics,
        })
    }

    async fn evaluate(&self, _state: &GlobalState) -> Result<(f64, Metrics), ClientError> {
        Ok((0.5, Metrics::new()))
    }
}
