use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::task::JoinHandle;
use tracing::instrument;

use super::{CachedPayload, Clock, PayloadCache, RemotePayload};
use crate::config::TtlPolicy;
use crate::errors::{CacheError, FreshnessError};
use crate::metrics::consts::{
    CACHE_WRITE_ERRORS_COUNTER, HYDRATION_SOURCE_COUNTER, REFRESH_OUTCOME_COUNTER,
    REFRESH_SUPERSEDED_COUNTER,
};
use crate::metrics::inc;
use crate::transport::Fetcher;

const STATE_UNINITIALIZED: u8 = 0;
const STATE_HYDRATING: u8 = 1;
const STATE_READY: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Refreshing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Uninitialized,
    Hydrating,
    Ready(RefreshState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another refresh holds the in-flight flag.
    InFlight,
    /// The current snapshot is still within its TTL.
    NotDue,
    /// The last fetch started less than the anti-thrash floor ago.
    Throttled,
    /// `hydrate` has not run yet.
    NotHydrated,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::InFlight => "in_flight",
            SkipReason::NotDue => "not_due",
            SkipReason::Throttled => "throttled",
            SkipReason::NotHydrated => "not_hydrated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Updated { next_fetch_at: DateTime<Utc> },
    Skipped(SkipReason),
    Failed(FreshnessError),
    /// The fetch completed after the cache was cleared; its result was dropped.
    Superseded,
}

impl RefreshOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshOutcome::Updated { .. } => "updated",
            RefreshOutcome::Skipped(reason) => reason.as_str(),
            RefreshOutcome::Failed(_) => "failed",
            RefreshOutcome::Superseded => "superseded",
        }
    }

    pub fn is_updated(&self) -> bool {
        matches!(self, RefreshOutcome::Updated { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HydrationSource {
    /// A valid persisted payload was applied.
    Cache,
    /// Nothing was persisted.
    Empty,
    /// The persisted payload failed validation and was discarded.
    Corrupted,
    /// Storage could not be read.
    Unavailable,
    /// `hydrate` had already run.
    AlreadyHydrated,
}

impl HydrationSource {
    pub fn as_str(self) -> &'static str {
        match self {
            HydrationSource::Cache => "cache",
            HydrationSource::Empty => "empty",
            HydrationSource::Corrupted => "corrupted",
            HydrationSource::Unavailable => "unavailable",
            HydrationSource::AlreadyHydrated => "already_hydrated",
        }
    }
}

/// Result of `hydrate`. Dropping `pending_refresh` leaves the refresh running in the background.
#[derive(Debug)]
pub struct Hydration {
    pub source: HydrationSource,
    pub pending_refresh: Option<JoinHandle<RefreshOutcome>>,
}

impl Hydration {
    /// Waits for the refresh scheduled by hydration, if there was one.
    pub async fn settled(self) -> Option<RefreshOutcome> {
        let handle = self.pending_refresh?;
        match handle.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::error!("hydration refresh task failed: {}", e);
                None
            }
        }
    }
}

/// The in-memory view of one cache. Replaced as a whole, read without awaiting.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<P> {
    pub payload: P,
    pub saved_at: DateTime<Utc>,
    pub next_fetch_at: DateTime<Utc>,
    /// `true` when the payload came from the network during this process's lifetime.
    pub fetched_this_session: bool,
}

impl<P> Snapshot<P> {
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now >= self.next_fetch_at
    }
}

/// Clears the in-flight flag when dropped, including on early returns and panics.
struct InFlightGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Owns the snapshot and the persisted cache of one remote document.
///
/// This is the only writer of either. Readers take a cheap `Arc` clone of the current
/// snapshot; refreshes are serialized by a single in-flight flag that is set before the
/// first await and released by a drop guard after the last one.
pub struct FreshnessController<P: RemotePayload> {
    cache: PayloadCache<P>,
    fetcher: Arc<dyn Fetcher>,
    clock: Arc<dyn Clock>,
    policy: TtlPolicy,
    snapshot: RwLock<Option<Arc<Snapshot<P>>>>,
    state: AtomicU8,
    in_flight: Arc<AtomicBool>,
    generation: AtomicU64,
    last_fetch_started_at: Mutex<Option<DateTime<Utc>>>,
    last_error: Mutex<Option<FreshnessError>>,
}

impl<P: RemotePayload> FreshnessController<P> {
    pub fn new(
        cache: PayloadCache<P>,
        fetcher: Arc<dyn Fetcher>,
        clock: Arc<dyn Clock>,
        policy: TtlPolicy,
    ) -> Self {
        Self {
            cache,
            fetcher,
            clock,
            policy,
            snapshot: RwLock::new(None),
            state: AtomicU8::new(STATE_UNINITIALIZED),
            in_flight: Arc::new(AtomicBool::new(false)),
            generation: AtomicU64::new(0),
            last_fetch_started_at: Mutex::new(None),
            last_error: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ControllerState {
        match self.state.load(Ordering::Acquire) {
            STATE_UNINITIALIZED => ControllerState::Uninitialized,
            STATE_HYDRATING => ControllerState::Hydrating,
            _ if self.is_refreshing() => ControllerState::Ready(RefreshState::Refreshing),
            _ => ControllerState::Ready(RefreshState::Idle),
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// The current snapshot, if any payload has been applied.
    pub fn snapshot(&self) -> Option<Arc<Snapshot<P>>> {
        match self.snapshot.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Stale means a refresh is due: either nothing was ever applied or the TTL elapsed.
    pub fn is_stale(&self) -> bool {
        self.is_due(self.clock.now())
    }

    /// Diagnostic only. Cleared by the next successful refresh.
    pub fn last_error(&self) -> Option<FreshnessError> {
        lock(&self.last_error).clone()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Loads the persisted payload into memory and, if it is missing or expired, schedules a
    /// background refresh. Only the first call does anything.
    ///
    /// The in-flight flag is held from the start so no refresh can overtake the cached payload.
    #[instrument(skip_all, fields(kind = P::KIND))]
    pub async fn hydrate(self: &Arc<Self>) -> Hydration {
        if self
            .state
            .compare_exchange(
                STATE_UNINITIALIZED,
                STATE_HYDRATING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Hydration {
                source: HydrationSource::AlreadyHydrated,
                pending_refresh: None,
            };
        }
        let guard = self.try_begin_refresh();
        let generation = self.generation();

        let source = match self.cache.read().await {
            Ok(Some(entry)) => {
                if !self.apply_if_current(entry, false, generation) {
                    tracing::debug!("{} cache was cleared while hydrating", P::KIND);
                }
                HydrationSource::Cache
            }
            Ok(None) => HydrationSource::Empty,
            Err(CacheError::Corrupted(e)) => {
                tracing::warn!("ignoring corrupted {} cache: {}", P::KIND, e);
                if let Err(e) = self.cache.clear().await {
                    tracing::warn!("failed to clear corrupted {} cache: {}", P::KIND, e);
                }
                HydrationSource::Corrupted
            }
            Err(CacheError::Storage(e)) => {
                tracing::warn!("failed to read {} cache: {}", P::KIND, e);
                HydrationSource::Unavailable
            }
        };
        inc(
            HYDRATION_SOURCE_COUNTER,
            &[
                ("kind".to_string(), P::KIND.to_string()),
                ("source".to_string(), source.as_str().to_string()),
            ],
            1,
        );

        self.state.store(STATE_READY, Ordering::Release);

        let pending_refresh = match guard {
            Some(guard) if self.is_stale() => {
                tracing::debug!("{} cache is missing or expired, refreshing", P::KIND);
                let controller = Arc::clone(self);
                Some(tokio::spawn(async move {
                    controller.refresh_holding(guard, false).await
                }))
            }
            _ => None,
        };

        Hydration {
            source,
            pending_refresh,
        }
    }

    /// Fetches a new payload unless a guard says otherwise. Never fails: errors are recorded in
    /// `last_error` and the previous snapshot stays authoritative.
    ///
    /// `force` skips the TTL check but not the in-flight check or the anti-thrash floor.
    #[instrument(skip_all, fields(kind = P::KIND, force = force))]
    pub async fn refresh(&self, force: bool) -> RefreshOutcome {
        if self.state.load(Ordering::Acquire) != STATE_READY {
            return self.record(RefreshOutcome::Skipped(SkipReason::NotHydrated));
        }
        let Some(guard) = self.try_begin_refresh() else {
            return self.record(RefreshOutcome::Skipped(SkipReason::InFlight));
        };
        self.refresh_holding(guard, force).await
    }

    /// Fire-and-forget variant of `refresh`. The handle may be dropped.
    pub fn spawn_refresh(self: &Arc<Self>, force: bool) -> JoinHandle<RefreshOutcome> {
        let controller = Arc::clone(self);
        tokio::spawn(async move { controller.refresh(force).await })
    }

    /// Drops the snapshot and the persisted cache. Any fetch already in flight is discarded
    /// when it lands.
    #[instrument(skip_all, fields(kind = P::KIND))]
    pub async fn clear(&self) {
        self.invalidate();
        *lock(&self.last_error) = None;
        if let Err(e) = self.cache.clear().await {
            tracing::warn!("failed to clear persisted {} cache: {}", P::KIND, e);
        }
    }

    fn try_begin_refresh(&self) -> Option<InFlightGuard> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard {
                flag: Arc::clone(&self.in_flight),
            })
    }

    async fn refresh_holding(&self, guard: InFlightGuard, force: bool) -> RefreshOutcome {
        let now = self.clock.now();
        if !force && !self.is_due(now) {
            return self.record(RefreshOutcome::Skipped(SkipReason::NotDue));
        }
        {
            let mut last_started = lock(&self.last_fetch_started_at);
            if let Some(started) = *last_started {
                if now < started + self.policy.min_fetch_interval() {
                    tracing::debug!("{} refresh throttled, last fetch at {}", P::KIND, started);
                    return self.record(RefreshOutcome::Skipped(SkipReason::Throttled));
                }
            }
            *last_started = Some(now);
        }

        let generation = self.generation();
        let outcome = match self.fetch_and_store(generation).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!("{} refresh failed, keeping previous state: {}", P::KIND, e);
                *lock(&self.last_error) = Some(e.clone());
                RefreshOutcome::Failed(e)
            }
        };
        drop(guard);
        self.record(outcome)
    }

    async fn fetch_and_store(&self, generation: u64) -> Result<RefreshOutcome, FreshnessError> {
        let body = self.fetcher.fetch().await?;
        let payload = P::parse(&body)?;

        let saved_at = self.clock.now();
        let ttl = self.policy.effective_ttl(payload.ttl_seconds());
        let entry = CachedPayload::new(payload, saved_at, ttl);

        if self.generation() != generation {
            return Ok(self.superseded());
        }

        // Persist first: if the write fails, neither copy changes.
        if let Err(e) = self.cache.write(&entry).await {
            inc(
                CACHE_WRITE_ERRORS_COUNTER,
                &[("kind".to_string(), P::KIND.to_string())],
                1,
            );
            return Err(match e {
                CacheError::Storage(e) => FreshnessError::Storage(e),
                CacheError::Corrupted(e) => FreshnessError::Payload(e),
            });
        }

        let next_fetch_at = entry.next_fetch_at;
        if !self.apply_if_current(entry, true, generation) {
            // A clear() ran while the write was suspended; undo the write it could not see.
            if let Err(e) = self.cache.clear().await {
                tracing::warn!("failed to remove superseded {} cache: {}", P::KIND, e);
            }
            return Ok(self.superseded());
        }
        *lock(&self.last_error) = None;
        tracing::info!("{} refreshed, next fetch at {}", P::KIND, next_fetch_at);
        Ok(RefreshOutcome::Updated { next_fetch_at })
    }

    fn superseded(&self) -> RefreshOutcome {
        inc(
            REFRESH_SUPERSEDED_COUNTER,
            &[("kind".to_string(), P::KIND.to_string())],
            1,
        );
        RefreshOutcome::Superseded
    }

    fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.snapshot() {
            Some(snapshot) => snapshot.is_stale(now),
            None => true,
        }
    }

    /// Installs `entry` unless `clear()` bumped the generation since `generation` was read.
    ///
    /// The generation is compared under the snapshot write lock, which `clear()` also holds
    /// while bumping it, so a cleared snapshot can never be overwritten by an older fetch.
    fn apply_if_current(
        &self,
        entry: CachedPayload<P>,
        fetched_this_session: bool,
        generation: u64,
    ) -> bool {
        let mut guard = match self.snapshot.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if self.generation() != generation {
            return false;
        }
        *guard = Some(Arc::new(Snapshot {
            payload: entry.payload,
            saved_at: entry.saved_at,
            next_fetch_at: entry.next_fetch_at,
            fetched_this_session,
        }));
        true
    }

    /// Drops the snapshot and starts a new generation in one step.
    fn invalidate(&self) {
        let mut guard = match self.snapshot.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.generation.fetch_add(1, Ordering::AcqRel);
        *guard = None;
    }

    fn record(&self, outcome: RefreshOutcome) -> RefreshOutcome {
        inc(
            REFRESH_OUTCOME_COUNTER,
            &[
                ("kind".to_string(), P::KIND.to_string()),
                ("outcome".to_string(), outcome.as_str().to_string()),
            ],
            1,
        );
        outcome
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
