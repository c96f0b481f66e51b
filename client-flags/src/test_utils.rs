use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use common_kv_store::MockClient;
use rand::{distributions::Alphanumeric, Rng};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

use crate::config::DEFAULT_TEST_CONFIG;
use crate::entitlements::EntitlementStore;
use crate::errors::TransportError;
use crate::flags::flag_models::{RemoteFeaturesPayload, RemoteFlagValue};
use crate::freshness::{Clock, FreshnessController, PayloadCache};
use crate::transport::Fetcher;

pub fn random_string(prefix: &str, length: usize) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(Alphanumeric)
        .take(length)
        .map(char::from)
        .collect();
    format!("{}{}", prefix, suffix)
}

pub fn parse_time(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .expect("Failed to parse test timestamp")
        .with_timezone(&Utc)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn at(raw: &str) -> Self {
        Self {
            now: Mutex::new(parse_time(raw)),
        }
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = lock(&self.now);
        *now += by;
    }

    pub fn set(&self, raw: &str) {
        *lock(&self.now) = parse_time(raw);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

/// Scripted fetcher. Queued responses are served first, then the default one.
///
/// `hold` makes every fetch park after it has been counted, until `release`.
pub struct MockFetcher {
    queued: Mutex<VecDeque<Result<Bytes, TransportError>>>,
    default: Mutex<Result<Bytes, TransportError>>,
    calls: AtomicUsize,
    held: watch::Sender<bool>,
}

impl Default for MockFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFetcher {
    pub fn new() -> Self {
        let (held, _) = watch::channel(false);
        Self {
            queued: Mutex::new(VecDeque::new()),
            default: Mutex::new(Err(TransportError::Network(
                "no response configured".to_string(),
            ))),
            calls: AtomicUsize::new(0),
            held,
        }
    }

    pub fn respond_with(&self, body: Bytes) {
        *lock(&self.default) = Ok(body);
    }

    pub fn fail_with(&self, err: TransportError) {
        *lock(&self.default) = Err(err);
    }

    pub fn push_response(&self, response: Result<Bytes, TransportError>) {
        lock(&self.queued).push_back(response);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn hold(&self) {
        self.held.send_replace(true);
    }

    pub fn release(&self) {
        self.held.send_replace(false);
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self) -> Result<Bytes, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut held = self.held.subscribe();
        if held.wait_for(|held| !*held).await.is_err() {
            return Err(TransportError::Network("fetcher dropped".to_string()));
        }

        if let Some(response) = lock(&self.queued).pop_front() {
            return response;
        }
        lock(&self.default).clone()
    }
}

/// Yields until `fetcher` has seen at least `count` calls.
pub async fn wait_for_calls(fetcher: &MockFetcher, count: usize) {
    while fetcher.calls() < count {
        tokio::task::yield_now().await;
    }
}

pub fn features_payload(
    flags: &[(&str, RemoteFlagValue)],
    ttl_seconds: Option<i64>,
) -> RemoteFeaturesPayload {
    RemoteFeaturesPayload {
        version: 1,
        ttl_seconds,
        flags: flags
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect(),
    }
}

pub fn features_body(flags: &[(&str, RemoteFlagValue)], ttl_seconds: Option<i64>) -> Bytes {
    let payload = features_payload(flags, ttl_seconds);
    Bytes::from(serde_json::to_vec(&payload).expect("Failed to serialize features payload"))
}

pub fn entitlements_body(entitlements: &[(&str, bool)]) -> Bytes {
    let entitlements: serde_json::Map<String, serde_json::Value> = entitlements
        .iter()
        .map(|(key, owned)| (key.to_string(), json!(owned)))
        .collect();
    Bytes::from(json!({"version": 1, "entitlements": entitlements}).to_string())
}

/// A flags controller over empty storage, hydrated from `body` and settled.
pub async fn hydrated_flags_controller(
    body: Bytes,
) -> Arc<FreshnessController<RemoteFeaturesPayload>> {
    let fetcher = Arc::new(MockFetcher::new());
    fetcher.respond_with(body);
    let controller = Arc::new(FreshnessController::new(
        PayloadCache::new(
            Arc::new(MockClient::new()),
            DEFAULT_TEST_CONFIG.flags_cache_key.clone(),
        ),
        fetcher,
        Arc::new(ManualClock::at("2026-03-01T12:00:00Z")),
        DEFAULT_TEST_CONFIG.flags_ttl_policy(),
    ));
    let outcome = controller.hydrate().await.settled().await;
    assert!(
        outcome.as_ref().is_some_and(|o| o.is_updated()),
        "flags controller failed to hydrate: {outcome:?}"
    );
    controller
}

/// An entitlement store wired to a scripted fetcher, mock storage and a manual clock.
pub struct EntitlementsHarness {
    pub store: EntitlementStore,
    pub fetcher: Arc<MockFetcher>,
    pub clock: Arc<ManualClock>,
    pub storage: MockClient,
    pub key: String,
}

impl EntitlementsHarness {
    pub fn new() -> Self {
        Self::over(MockClient::new())
    }

    /// Starts from `raw` already persisted under the entitlements key.
    pub fn with_persisted(raw: &str) -> Self {
        let key = &DEFAULT_TEST_CONFIG.entitlements_cache_key;
        Self::over(MockClient::new().with_value(key, raw))
    }

    pub fn over(storage: MockClient) -> Self {
        let key = DEFAULT_TEST_CONFIG.entitlements_cache_key.clone();
        let fetcher = Arc::new(MockFetcher::new());
        let clock = Arc::new(ManualClock::at("2026-03-01T12:00:00Z"));
        let controller = Arc::new(FreshnessController::new(
            PayloadCache::new(Arc::new(storage.clone()), key.clone()),
            fetcher.clone(),
            clock.clone(),
            DEFAULT_TEST_CONFIG.entitlements_ttl_policy(),
        ));
        Self {
            store: EntitlementStore::new(controller),
            fetcher,
            clock,
            storage,
            key,
        }
    }
}

impl Default for EntitlementsHarness {
    fn default() -> Self {
        Self::new()
    }
}
