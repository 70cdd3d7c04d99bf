//! The worker directory: registration, discovery and sampling.
//!
//! All mutations and the availability check go through one mutex;
//! sampling callers that find too few workers park on a `Notify`
//! that both `register` and `unregister` fire.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};

use comms::{
    RelayHandle,
    event::{MessageType, unix_millis},
};
use futures::{StreamExt, stream};
use log::{info, warn};
use serde_json::json;
use tokio::sync::{Mutex, Notify, watch};

use crate::{
    client::WorkerClient,
    error::{ClientError, InsufficientWorkers},
    state::WorkerId,
};

/// Discovered properties of a registered worker.
#[derive(Debug, Clone)]
pub struct WorkerProfile {
    pub id: WorkerId,
    /// The short id the worker declares for itself.
    pub short_id: String,
    pub device: String,
    pub ip: String,
    pub mac: String,
    pub registered_at_ms: u64,
}

impl WorkerProfile {
    fn from_properties(id: &str, props: &BTreeMap<String, String>) -> Self {
        let get = |key: &str, default: &str| {
            props.get(key).cloned().unwrap_or_else(|| default.to_string())
        };

        Self {
            id: id.to_string(),
            short_id: get("cid", "0"),
            device: get("device", "unknown"),
            ip: get("ip", "0.0.0.0"),
            mac: get("mac", "00:00:00:00:00:00"),
            registered_at_ms: unix_millis(),
        }
    }

    /// The directory-update payload relayed downstream.
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "client_id": self.id,
            "client_cid": self.short_id,
            "device": self.device,
            "ip": self.ip,
            "mac": self.mac,
        })
    }
}

/// Selection filter applied during sampling.
pub trait Criterion {
    fn select(&self, profile: &WorkerProfile) -> bool;
}

impl<F: Fn(&WorkerProfile) -> bool> Criterion for F {
    fn select(&self, profile: &WorkerProfile) -> bool {
        self(profile)
    }
}

/// One worker chosen by `sample`, ready to be dispatched to.
#[derive(Debug)]
pub struct SampledWorker<C> {
    pub profile: WorkerProfile,
    pub client: Arc<C>,
}

impl<C> Clone for SampledWorker<C> {
    fn clone(&self) -> Self {
        Self {
            profile: self.profile.clone(),
            client: Arc::clone(&self.client),
        }
    }
}

type DiscoveryResult = Result<WorkerProfile, String>;

enum Discovery {
    Done(WorkerProfile),
    InFlight(watch::Receiver<Option<DiscoveryResult>>),
}

struct Inner<C> {
    handles: HashMap<WorkerId, Arc<C>>,
    discovery: HashMap<WorkerId, Discovery>,
}

/// Registry of known workers and their discovered properties.
pub struct Directory<C> {
    inner: Mutex<Inner<C>>,
    availability: Notify,
    relay: RelayHandle,
    discovery_timeout: Duration,
    discovery_concurrency: usize,
}

impl<C: WorkerClient> Directory<C> {
    pub fn new(relay: RelayHandle, discovery_timeout: Duration, discovery_concurrency: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                handles: HashMap::new(),
                discovery: HashMap::new(),
            }),
            availability: Notify::new(),
            relay,
            discovery_timeout,
            discovery_concurrency: discovery_concurrency.max(1),
        }
    }

    /// Adds a connected worker and wakes availability waiters.
    ///
    /// # Returns
    /// `false` if the id was already registered (the new handle is
    /// dropped; a worker appears in at most one entry).
    pub async fn register(&self, id: WorkerId, client: C) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.handles.contains_key(&id) {
            warn!("worker {id} is already registered");
            return false;
        }

        info!("worker {id} registered");
        inner.handles.insert(id, Arc::new(client));
        drop(inner);

        self.availability.notify_waiters();
        true
    }

    /// Removes a worker and wakes availability waiters so they can
    /// re-check (or give up on) the population.
    pub async fn unregister(&self, id: &str) {
        let mut inner = self.inner.lock().await;
        if inner.handles.remove(id).is_some() {
            info!("worker {id} unregistered");
        }
        inner.discovery.remove(id);
        drop(inner);

        self.availability.notify_waiters();
    }

    pub async fn num_available(&self) -> usize {
        self.inner.lock().await.handles.len()
    }

    /// Returns the worker's profile, discovering it on first contact.
    ///
    /// Concurrent callers for the same unknown id share one in-flight
    /// discovery call; exactly one RPC is issued.
    ///
    /// # Errors
    /// `ClientError` if the worker is unknown or discovery failed.
    pub async fn register_if_unknown(&self, id: &WorkerId) -> Result<WorkerProfile, ClientError> {
        enum Role<C> {
            Waiter(watch::Receiver<Option<DiscoveryResult>>),
            Prober(Arc<C>, watch::Sender<Option<DiscoveryResult>>),
        }

        let role = {
            let mut inner = self.inner.lock().await;
            match inner.discovery.get(id) {
                Some(Discovery::Done(profile)) => return Ok(profile.clone()),
                Some(Discovery::InFlight(rx)) => Role::Waiter(rx.clone()),
                None => {
                    let Some(client) = inner.handles.get(id).cloned() else {
                        return Err(ClientError::Remote(format!("unknown worker {id}")));
                    };

                    let (tx, rx) = watch::channel(None);
                    inner
                        .discovery
                        .insert(id.clone(), Discovery::InFlight(rx));
                    Role::Prober(client, tx)
                }
            }
        };

        match role {
            Role::Waiter(rx) => self.await_discovery(id, rx).await,
            Role::Prober(client, tx) => self.probe(id, client, tx).await,
        }
    }

    async fn await_discovery(
        &self,
        id: &str,
        mut rx: watch::Receiver<Option<DiscoveryResult>>,
    ) -> Result<WorkerProfile, ClientError> {
        loop {
            if let Some(result) = rx.borrow_and_update().clone() {
                return result.map_err(ClientError::Remote);
            }
            rx.changed()
                .await
                .map_err(|_| ClientError::Remote(format!("discovery of {id} was dropped")))?;
        }
    }

    async fn probe(
        &self,
        id: &WorkerId,
        client: Arc<C>,
        tx: watch::Sender<Option<DiscoveryResult>>,
    ) -> Result<WorkerProfile, ClientError> {
        let result = client.discover_properties(self.discovery_timeout).await;

        let mut inner = self.inner.lock().await;
        match result {
            Ok(props) => {
                let profile = WorkerProfile::from_properties(id, &props);
                // Keep the entry only while the worker itself is kept.
                if inner.handles.contains_key(id) {
                    inner
                        .discovery
                        .insert(id.clone(), Discovery::Done(profile.clone()));
                }
                drop(inner);

                info!("discovered worker {id}: {}", profile.to_json());
                self.relay
                    .send(MessageType::UpdateDirectory, profile.to_json());
                let _ = tx.send(Some(Ok(profile.clone())));
                Ok(profile)
            }
            Err(e) => {
                inner.discovery.remove(id);
                drop(inner);

                let _ = tx.send(Some(Err(e.to_string())));
                Err(e)
            }
        }
    }

    /// Selects up to `n` available workers, at least `min_n` of them.
    ///
    /// Waits up to `wait` for availability to reach `min_n`, then
    /// fails with `InsufficientWorkers`. Newly selected workers
    /// without a profile are discovered through a bounded fan-out;
    /// all discovery calls complete before this returns. Workers
    /// whose discovery fails, that a `criterion` rejects, or that
    /// were unregistered while discovery ran are dropped from the
    /// returned set.
    pub async fn sample(
        &self,
        n: usize,
        min_n: usize,
        criterion: Option<&(dyn Criterion + Send + Sync)>,
        wait: Duration,
    ) -> Result<Vec<SampledWorker<C>>, InsufficientWorkers> {
        let deadline = tokio::time::Instant::now() + wait;

        let picked: Vec<(WorkerId, Arc<C>)> = loop {
            // Arm the waiter before checking, so a notify between the
            // check and the await is not lost.
            let mut notified = std::pin::pin!(self.availability.notified());
            notified.as_mut().enable();

            let available = {
                let inner = self.inner.lock().await;
                let candidates = candidate_ids(&inner, criterion);

                if candidates.len() >= min_n {
                    break pick_random(&inner, candidates, n);
                }
                candidates.len()
            };

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(InsufficientWorkers {
                    available,
                    required: min_n,
                });
            }
        };

        // Wait-all barrier over the discovery fan-out.
        let discovered: Vec<Option<SampledWorker<C>>> = stream::iter(picked)
            .map(|(id, client)| async move {
                match self.register_if_unknown(&id).await {
                    Ok(profile) => Some(SampledWorker { profile, client }),
                    Err(e) => {
                        warn!("dropping worker {id} from sample: {e}");
                        None
                    }
                }
            })
            .buffer_unordered(self.discovery_concurrency)
            .collect()
            .await;

        // A sampled id must never outlive its registration.
        let inner = self.inner.lock().await;
        let sampled = discovered
            .into_iter()
            .flatten()
            .filter(|w| inner.handles.contains_key(&w.profile.id))
            .filter(|w| criterion.is_none_or(|c| c.select(&w.profile)))
            .collect();

        Ok(sampled)
    }
}

/// Ids eligible for sampling: unknown workers always qualify (their
/// profile does not exist yet); known ones must pass the criterion.
fn candidate_ids<C>(inner: &Inner<C>, criterion: Option<&(dyn Criterion + Send + Sync)>) -> Vec<WorkerId> {
    inner
        .handles
        .keys()
        .filter(|id| match inner.discovery.get(*id) {
            Some(Discovery::Done(profile)) => criterion.is_none_or(|c| c.select(profile)),
            _ => true,
        })
        .cloned()
        .collect()
}

fn pick_random<C>(
    inner: &Inner<C>,
    candidates: Vec<WorkerId>,
    n: usize,
) -> Vec<(WorkerId, Arc<C>)> {
    let amount = n.min(candidates.len());
    let mut rng = rand::rng();

    rand::seq::index::sample(&mut rng, candidates.len(), amount)
        .into_iter()
        .map(|i| {
            let id = candidates[i].clone();
            let client = Arc::clone(&inner.handles[&id]);
            (id, client)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::testutil::FakeClient;

    fn directory(relay: RelayHandle) -> Directory<FakeClient> {
        Directory::new(relay, Duration::from_secs(1), 4)
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let dir = directory(RelayHandle::disabled());
        assert!(dir.register("w-0".into(), FakeClient::new("w-0")).await);
        assert!(!dir.register("w-0".into(), FakeClient::new("w-0")).await);
        assert_eq!(dir.num_available().await, 1);
    }

    #[tokio::test]
    async fn concurrent_discovery_issues_one_call() {
        let dir = Arc::new(directory(RelayHandle::disabled()));
        let calls = Arc::new(AtomicUsize::new(0));

        // The delay keeps the first discovery in flight while the
        // second caller arrives.
        let client = FakeClient::new("w-0")
            .with_discovery_delay(Duration::from_millis(20))
            .counting_discoveries(Arc::clone(&calls));
        dir.register("w-0".into(), client).await;

        let id: WorkerId = "w-0".into();
        let (a, b) = tokio::join!(dir.register_if_unknown(&id), dir.register_if_unknown(&id));

        assert_eq!(a.unwrap().id, "w-0");
        assert_eq!(b.unwrap().id, "w-0");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn discovery_failure_drops_worker_from_sample() {
        let dir = directory(RelayHandle::disabled());
        dir.register("good".into(), FakeClient::new("good")).await;
        dir.register("bad".into(), FakeClient::new("bad").failing_discovery())
            .await;

        let sampled = dir
            .sample(2, 2, None, Duration::from_millis(100))
            .await
            .unwrap();

        let ids: Vec<_> = sampled.iter().map(|w| w.profile.id.clone()).collect();
        assert_eq!(ids, vec!["good".to_string()]);
    }

    #[tokio::test]
    async fn sample_fails_when_population_is_short() {
        let dir = directory(RelayHandle::disabled());
        dir.register("w-0".into(), FakeClient::new("w-0")).await;

        let err = dir
            .sample(3, 2, None, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err.available, 1);
        assert_eq!(err.required, 2);
    }

    #[tokio::test]
    async fn sample_wakes_up_when_workers_arrive() {
        let dir = Arc::new(directory(RelayHandle::disabled()));
        dir.register("w-0".into(), FakeClient::new("w-0")).await;

        let sampler = {
            let dir = Arc::clone(&dir);
            tokio::spawn(async move { dir.sample(2, 2, None, Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        dir.register("w-1".into(), FakeClient::new("w-1")).await;

        let sampled = sampler.await.unwrap().unwrap();
        assert_eq!(sampled.len(), 2);
    }

    #[tokio::test]
    async fn unregistered_worker_never_comes_out_of_sample() {
        let dir = Arc::new(directory(RelayHandle::disabled()));
        // Slow discovery leaves a window for the concurrent unregister.
        dir.register(
            "slow".into(),
            FakeClient::new("slow").with_discovery_delay(Duration::from_millis(50)),
        )
        .await;
        dir.register("w-1".into(), FakeClient::new("w-1")).await;

        let sampler = {
            let dir = Arc::clone(&dir);
            tokio::spawn(async move { dir.sample(2, 2, None, Duration::from_secs(1)).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        dir.unregister("slow").await;

        let sampled = sampler.await.unwrap().unwrap();
        assert!(sampled.iter().all(|w| w.profile.id != "slow"));
    }

    #[tokio::test]
    async fn discovery_relays_directory_update() {
        let (relay, mut events) = RelayHandle::pair("server");
        let dir = directory(relay);
        dir.register("w-7".into(), FakeClient::new("w-7")).await;

        dir.register_if_unknown(&"w-7".to_string()).await.unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(event.message_type, MessageType::UpdateDirectory as u8);
        assert_eq!(event.message["client_id"], "w-7");
    }

    #[tokio::test]
    async fn criterion_filters_known_workers() {
        let dir = directory(RelayHandle::disabled());
        dir.register("keep".into(), FakeClient::new("keep")).await;
        dir.register("skip".into(), FakeClient::new("skip")).await;

        let criterion = |p: &WorkerProfile| p.id != "skip";
        let sampled = dir
            .sample(2, 1, Some(&criterion), Duration::from_millis(100))
            .await
            .unwrap();

        assert!(sampled.iter().all(|w| w.profile.id == "keep"));
    }
}
