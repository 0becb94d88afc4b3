//! Fetch scheduler
//!
//! Reads cache keys from the backend on demand, on a polling interval and on
//! window-focus regain.
//!
//! ## Design
//!
//! - Every read for a key goes through one shared future stored in
//!   `in_flight`. Concurrent callers clone the shared future instead of
//!   issuing a second request. The future is spawned, so it runs to
//!   completion (and lands in the store) even if every caller goes away.
//! - A failed read keeps the previous data, flags the entry as failed and is
//!   not retried until the next poll, focus event or explicit call.
//! - `watch` spawns one task per watcher; dropping the returned `PollHandle`
//!   cancels its timer and focus listener.
//! - `start`/`stop` drive `tick`, which refetches every stale key that was
//!   fetched before (this is where deferred invalidations are picked up).

use crate::backend::{Backend, BackendError};
use crate::cache::{CacheKey, Collection, EntityCacheStore};
use crate::models::EntityKind;
use crate::stats::{dashboard_stats, StatsFilter, TimeWindow};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{self, BoxFuture, FutureExt, Shared};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Collections the derived dashboard aggregate is computed from
pub const AGGREGATE_SOURCES: [EntityKind; 5] = [
    EntityKind::Project,
    EntityKind::Section,
    EntityKind::Spending,
    EntityKind::Inventory,
    EntityKind::Employee,
];

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// A read of `key` failed. The entry keeps its previous data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to fetch {key}: {source}")]
pub struct FetchError {
    pub key: CacheKey,
    #[source]
    pub source: BackendError,
}

pub type FetchResult = Result<Collection, FetchError>;

type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    pub refetch_on_focus: bool,
    /// Window the `dashboard-aggregate` key is computed for
    pub dashboard_window: TimeWindow,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            refetch_on_focus: true,
            dashboard_window: TimeWindow::AllTime,
        }
    }
}

/// How a watcher keeps its key fresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    /// Re-read every `interval`; `None` disables polling
    pub interval: Option<Duration>,
    /// Re-read when the window regains focus
    pub on_focus: bool,
}

impl PollOptions {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval: Some(interval),
            on_focus: true,
        }
    }

    /// Initial read only
    pub fn once() -> Self {
        Self {
            interval: None,
            on_focus: false,
        }
    }
}

/// Keys refreshed by one [`FetchScheduler::tick`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub refreshed: Vec<CacheKey>,
    pub failed: Vec<CacheKey>,
}

impl TickSummary {
    pub fn is_empty(&self) -> bool {
        self.refreshed.is_empty() && self.failed.is_empty()
    }
}

struct SchedulerInner {
    store: Arc<EntityCacheStore>,
    backend: Arc<dyn Backend>,
    config: SchedulerConfig,
    in_flight: DashMap<CacheKey, SharedFetch>,
    watchers: DashMap<CacheKey, usize>,
    focus: broadcast::Sender<()>,
    poller: Mutex<Option<CancellationToken>>,
    /// Bumped on reset; reads issued before a reset are not stored
    epoch: AtomicU64,
}

/// Schedules reads of cache keys. Cheap to clone.
#[derive(Clone)]
pub struct FetchScheduler {
    inner: Arc<SchedulerInner>,
}

impl FetchScheduler {
    pub fn new(
        store: Arc<EntityCacheStore>,
        backend: Arc<dyn Backend>,
        config: SchedulerConfig,
    ) -> Self {
        let (focus, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(SchedulerInner {
                store,
                backend,
                config,
                in_flight: DashMap::new(),
                watchers: DashMap::new(),
                focus,
                poller: Mutex::new(None),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    pub fn store(&self) -> &Arc<EntityCacheStore> {
        &self.inner.store
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Poll options derived from the configuration
    pub fn default_poll_options(&self) -> PollOptions {
        PollOptions {
            interval: Some(self.inner.config.poll_interval),
            on_focus: self.inner.config.refetch_on_focus,
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Cached data if it is fresh, otherwise the result of a read (joining
    /// one already in flight).
    pub fn ensure_fresh(&self, key: &CacheKey) -> BoxFuture<'static, FetchResult> {
        if let Some(pending) = self.in_flight(key) {
            return pending.boxed();
        }
        if !self.inner.store.is_stale(key) {
            return future::ready(Ok(self.inner.store.data(key))).boxed();
        }
        self.refresh(key)
    }

    /// Read `key` now regardless of staleness, joining a read already in flight
    pub fn refresh(&self, key: &CacheKey) -> BoxFuture<'static, FetchResult> {
        let (fetch, started) = match self.inner.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => {
                debug!(key = %key, "Joining in-flight fetch");
                (entry.get().clone(), false)
            }
            Entry::Vacant(entry) => {
                let this = self.clone();
                let task_key = key.clone();
                let fetch = async move { this.fetch_into_store(task_key).await }
                    .boxed()
                    .shared();
                entry.insert(fetch.clone());
                (fetch, true)
            }
        };
        if started {
            tokio::spawn(fetch.clone());
        }
        fetch.boxed()
    }

    /// Read `key` with a request issued after this call. A read already in
    /// flight may predate a mutation, so it is awaited first and then
    /// followed by a new one.
    pub fn refetch(&self, key: &CacheKey) -> BoxFuture<'static, FetchResult> {
        let pending = self.in_flight(key);
        let this = self.clone();
        let key = key.clone();
        async move {
            if let Some(pending) = pending {
                let _ = pending.await;
            }
            this.refresh(&key).await
        }
        .boxed()
    }

    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        self.inner.in_flight.contains_key(key)
    }

    fn in_flight(&self, key: &CacheKey) -> Option<SharedFetch> {
        self.inner.in_flight.get(key).map(|entry| entry.clone())
    }

    async fn fetch_into_store(self, key: CacheKey) -> FetchResult {
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        let requested_at = Utc::now();
        let started = Instant::now();
        debug!(key = %key, "Fetch started");

        let result = self.read(&key).await;
        let current = self.inner.epoch.load(Ordering::SeqCst) == epoch;

        let outcome = match result {
            Ok(records) if current => {
                let data = self.inner.store.set_fetched(key.clone(), records, requested_at);
                debug!(
                    key = %key,
                    records = data.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Fetch finished"
                );
                Ok(data)
            }
            Ok(records) => {
                debug!(key = %key, "Discarding fetch issued before reset");
                Ok(Arc::new(records))
            }
            Err(source) => {
                warn!(
                    key = %key,
                    error = %source,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Fetch failed, keeping previous data"
                );
                if current {
                    self.inner.store.mark_failed(&key, source.to_string());
                }
                Err(FetchError {
                    key: key.clone(),
                    source,
                })
            }
        };

        if current {
            self.inner.in_flight.remove(&key);
        }
        outcome
    }

    async fn read(&self, key: &CacheKey) -> Result<Vec<Value>, BackendError> {
        match key {
            CacheKey::Collection(kind) => self.inner.backend.list(*kind).await,
            CacheKey::ProjectDetail(id) => {
                let record = self.inner.backend.get(EntityKind::Project, id).await?;
                Ok(vec![record])
            }
            CacheKey::DashboardAggregate => self.compute_aggregate().await,
        }
    }

    /// Make the source collections fresh, then compute the dashboard stats
    /// for the configured window as a single record.
    async fn compute_aggregate(&self) -> Result<Vec<Value>, BackendError> {
        let sources = AGGREGATE_SOURCES.map(CacheKey::Collection);
        let results = future::join_all(sources.iter().map(|key| self.ensure_fresh(key))).await;
        if let Some(error) = results.into_iter().find_map(Result::err) {
            return Err(error.source);
        }

        let snapshot = self.inner.store.dashboard_snapshot();
        let filter = StatsFilter::window(self.inner.config.dashboard_window);
        let today = chrono::Local::now().date_naive();
        let stats = dashboard_stats(&snapshot, &filter, today);
        let record = serde_json::to_value(&stats).map_err(|e| BackendError::Decode(e.to_string()))?;
        Ok(vec![record])
    }

    // ========================================================================
    // Watchers
    // ========================================================================

    /// Keep `key` fresh until the returned handle is dropped. Reads once
    /// immediately, then on every interval and focus event.
    pub fn watch(&self, key: CacheKey, options: PollOptions) -> PollHandle {
        *self.inner.watchers.entry(key.clone()).or_insert(0) += 1;

        let token = CancellationToken::new();
        let focus = self.inner.focus.subscribe();
        tokio::spawn(
            self.clone()
                .run_watch(key.clone(), options, token.clone(), focus),
        );
        debug!(key = %key, ?options, "Watch started");

        PollHandle {
            key,
            token,
            scheduler: self.clone(),
        }
    }

    async fn run_watch(
        self,
        key: CacheKey,
        options: PollOptions,
        cancel: CancellationToken,
        mut focus: broadcast::Receiver<()>,
    ) {
        let _ = self.ensure_fresh(&key).await;

        let mut ticker = options.interval.map(|period| {
            let period = period.max(MIN_INTERVAL);
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = next_tick(&mut ticker) => {
                    let _ = self.ensure_fresh(&key).await;
                }
                event = focus.recv(), if options.on_focus => match event {
                    Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        debug!(key = %key, "Focus regained, refreshing");
                        let _ = self.ensure_fresh(&key).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        debug!(key = %key, "Watch stopped");
    }

    fn unwatch(&self, key: &CacheKey) {
        if let Entry::Occupied(mut entry) = self.inner.watchers.entry(key.clone()) {
            *entry.get_mut() -= 1;
            if *entry.get() == 0 {
                entry.remove();
            }
        }
    }

    /// Whether some view currently watches `key`
    pub fn is_watched(&self, key: &CacheKey) -> bool {
        self.inner.watchers.contains_key(key)
    }

    pub fn watched_keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = self
            .inner
            .watchers
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// The window regained focus
    pub fn notify_focus(&self) {
        // No watchers is fine
        let _ = self.inner.focus.send(());
    }

    // ========================================================================
    // Polling
    // ========================================================================

    /// Refetch every stale key that holds server data
    pub async fn tick(&self) -> TickSummary {
        let keys = self.inner.store.stale_fetched_keys();
        let results = future::join_all(keys.iter().map(|key| self.refresh(key))).await;

        let mut summary = TickSummary::default();
        for (key, result) in keys.into_iter().zip(results) {
            match result {
                Ok(_) => summary.refreshed.push(key),
                Err(_) => summary.failed.push(key),
            }
        }
        summary
    }

    /// Run [`tick`](Self::tick) on the configured interval until [`stop`](Self::stop)
    pub fn start(&self) {
        let mut poller = self.inner.poller.lock().unwrap_or_else(PoisonError::into_inner);
        if poller.is_some() {
            return;
        }
        let token = CancellationToken::new();
        *poller = Some(token.clone());

        let period = self.inner.config.poll_interval.max(MIN_INTERVAL);
        info!(interval_ms = period.as_millis() as u64, "Fetch scheduler started");

        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let summary = this.tick().await;
                        if !summary.is_empty() {
                            debug!(
                                refreshed = summary.refreshed.len(),
                                failed = summary.failed.len(),
                                "Poll tick finished"
                            );
                        }
                    }
                }
            }
        });
    }

    pub fn stop(&self) {
        let token = self
            .inner
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(token) = token {
            token.cancel();
            info!("Fetch scheduler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Forget in-flight reads. Their results are discarded when they land.
    pub fn reset(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.in_flight.clear();
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => future::pending::<()>().await,
    }
}

/// Keeps a watch alive. Dropping it cancels the watch; a read already in
/// flight still completes into the store.
pub struct PollHandle {
    key: CacheKey,
    token: CancellationToken,
    scheduler: FetchScheduler,
}

impl PollHandle {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.token.cancel();
        self.scheduler.unwatch(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use serde_json::json;

    fn setup(stale_time: Duration) -> (Arc<MockBackend>, FetchScheduler) {
        let backend = Arc::new(MockBackend::new());
        let store = Arc::new(EntityCacheStore::new(stale_time));
        let scheduler = FetchScheduler::new(store, backend.clone(), SchedulerConfig::default());
        (backend, scheduler)
    }

    fn projects() -> CacheKey {
        CacheKey::Collection(EntityKind::Project)
    }

    #[tokio::test]
    async fn test_concurrent_ensure_fresh_issues_one_read() {
        let (backend, scheduler) = setup(Duration::ZERO);
        backend.seed(EntityKind::Project, vec![json!({"id": "p-1"})]).await;
        backend.set_latency(Some(Duration::from_millis(50))).await;

        let (a, b) = tokio::join!(
            scheduler.ensure_fresh(&projects()),
            scheduler.ensure_fresh(&projects())
        );
        assert_eq!(a.unwrap().len(), 1);
        assert_eq!(b.unwrap().len(), 1);
        assert_eq!(backend.call_count("GET /projects").await, 1);
        assert!(!scheduler.is_in_flight(&projects()));
    }

    #[tokio::test]
    async fn test_fresh_data_is_not_refetched() {
        let (backend, scheduler) = setup(Duration::from_secs(60));
        backend.seed(EntityKind::Project, vec![json!({"id": "p-1"})]).await;

        scheduler.ensure_fresh(&projects()).await.unwrap();
        scheduler.ensure_fresh(&projects()).await.unwrap();
        assert_eq!(backend.call_count("GET /projects").await, 1);

        scheduler.store().mark_stale(&projects());
        scheduler.ensure_fresh(&projects()).await.unwrap();
        assert_eq!(backend.call_count("GET /projects").await, 2);
    }

    #[tokio::test]
    async fn test_failed_read_keeps_previous_data() {
        let (backend, scheduler) = setup(Duration::from_secs(60));
        backend.seed(EntityKind::Project, vec![json!({"id": "p-1"})]).await;
        scheduler.ensure_fresh(&projects()).await.unwrap();

        backend.fail_reads(EntityKind::Project, true).await;
        let err = scheduler.refresh(&projects()).await.unwrap_err();
        assert_eq!(err.key, projects());

        let cached = scheduler.store().get(&projects());
        assert_eq!(cached.data.len(), 1);
        assert!(cached.failure.is_some());
        assert!(cached.is_stale);
        // No automatic retry
        assert_eq!(backend.call_count("GET /projects").await, 2);
    }

    #[tokio::test]
    async fn test_project_detail_read() {
        let (backend, scheduler) = setup(Duration::ZERO);
        backend
            .seed(EntityKind::Project, vec![json!({"id": "p-1", "budget": 5})])
            .await;

        let detail = scheduler
            .ensure_fresh(&CacheKey::project_detail("p-1"))
            .await
            .unwrap();
        assert_eq!(detail[0]["id"], "p-1");
        assert_eq!(backend.calls().await, vec!["GET /projects/p-1".to_string()]);
    }

    #[tokio::test]
    async fn test_aggregate_reads_sources_and_stores_stats() {
        let (backend, scheduler) = setup(Duration::ZERO);
        backend
            .seed(EntityKind::Project, vec![json!({"id": "p-1", "budget": 1000})])
            .await;
        backend
            .seed(
                EntityKind::Spending,
                vec![json!({"id": "s-1", "amount": 250, "projectId": "p-1"})],
            )
            .await;

        scheduler
            .ensure_fresh(&CacheKey::DashboardAggregate)
            .await
            .unwrap();
        let stats = scheduler.store().dashboard_aggregate().unwrap();
        assert_eq!(stats.utilization_percent, 25.0);
        for kind in AGGREGATE_SOURCES {
            assert_eq!(
                backend.call_count(&format!("GET /{}", kind.collection())).await,
                1
            );
        }
    }

    #[tokio::test]
    async fn test_aggregate_fails_when_a_source_fails() {
        let (backend, scheduler) = setup(Duration::ZERO);
        backend.fail_reads(EntityKind::Section, true).await;

        let err = scheduler
            .ensure_fresh(&CacheKey::DashboardAggregate)
            .await
            .unwrap_err();
        assert_eq!(err.key, CacheKey::DashboardAggregate);
        assert!(scheduler.store().get(&CacheKey::DashboardAggregate).failure.is_some());
    }

    #[tokio::test]
    async fn test_tick_refreshes_stale_fetched_keys_only() {
        let (backend, scheduler) = setup(Duration::from_secs(60));
        scheduler.ensure_fresh(&projects()).await.unwrap();
        scheduler
            .ensure_fresh(&CacheKey::Collection(EntityKind::Section))
            .await
            .unwrap();
        scheduler.store().mark_stale(&projects());

        let summary = scheduler.tick().await;
        assert_eq!(summary.refreshed, vec![projects()]);
        assert!(summary.failed.is_empty());
        assert_eq!(backend.call_count("GET /projects").await, 2);
        assert_eq!(backend.call_count("GET /sections").await, 1);
    }

    #[tokio::test]
    async fn test_watch_reads_then_stops_on_drop() {
        let (backend, scheduler) = setup(Duration::ZERO);
        let mut changes = scheduler.store().subscribe_key(projects());

        let handle = scheduler.watch(projects(), PollOptions::once());
        assert!(scheduler.is_watched(&projects()));
        changes.changed().await.unwrap();
        assert_eq!(backend.call_count("GET /projects").await, 1);

        drop(handle);
        assert!(!scheduler.is_watched(&projects()));
    }

    #[tokio::test]
    async fn test_watch_refreshes_on_focus() {
        let (backend, scheduler) = setup(Duration::ZERO);
        let mut changes = scheduler.store().subscribe_key(projects());

        let _handle = scheduler.watch(
            projects(),
            PollOptions {
                interval: None,
                on_focus: true,
            },
        );
        changes.changed().await.unwrap();

        scheduler.notify_focus();
        changes.changed().await.unwrap();
        assert_eq!(backend.call_count("GET /projects").await, 2);
    }

    #[tokio::test]
    async fn test_watch_polls_on_interval() {
        let (backend, scheduler) = setup(Duration::ZERO);
        let mut changes = scheduler.store().subscribe_key(projects());

        let handle = scheduler.watch(projects(), PollOptions::every(Duration::from_millis(20)));
        for _ in 0..3 {
            changes.changed().await.unwrap();
        }
        assert!(backend.call_count("GET /projects").await >= 3);
        handle.stop();
    }

    #[tokio::test]
    async fn test_watcher_count_per_key() {
        let (_backend, scheduler) = setup(Duration::ZERO);
        let a = scheduler.watch(projects(), PollOptions::once());
        let b = scheduler.watch(projects(), PollOptions::once());
        drop(a);
        assert!(scheduler.is_watched(&projects()));
        drop(b);
        assert!(scheduler.watched_keys().is_empty());
    }

    #[tokio::test]
    async fn test_start_stop() {
        let (_backend, scheduler) = setup(Duration::ZERO);
        scheduler.start();
        scheduler.start();
        assert!(scheduler.is_running());
        scheduler.stop();
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn test_reset_discards_in_flight_results() {
        let (backend, scheduler) = setup(Duration::ZERO);
        backend.seed(EntityKind::Project, vec![json!({"id": "p-1"})]).await;
        backend.set_latency(Some(Duration::from_millis(30))).await;

        let pending = scheduler.refresh(&projects());
        scheduler.reset();
        pending.await.unwrap();
        assert!(!scheduler.store().contains(&projects()));
    }
}
