//! Worksite Sync
//!
//! Client-side state synchronisation for a construction project dashboard:
//! - Entity cache with staleness tracking and exact snapshot/restore
//! - Fetch scheduler with request de-duplication, polling and focus refetch
//! - Optimistic mutations with rollback and dependency-aware invalidation
//! - Windowed dashboard statistics over projects, sections, spendings,
//!   inventory, employees and payments

pub mod backend;
pub mod cache;
pub mod events;
pub mod models;
pub mod stats;
pub mod sync;
pub mod validation;

#[cfg(test)]
pub(crate) mod test_helpers;

use anyhow::Result;
use backend::{Backend, HttpBackend, SessionProvider};
use cache::EntityCacheStore;
use chrono::NaiveDate;
use events::ViewNotifier;
use serde::Deserialize;
use stats::{DashboardStats, PaymentSummary, ProjectReport, StatsFilter, TimeWindow};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use sync::{
    FetchError, FetchScheduler, InvalidationBroadcaster, MutationCoordinator, SchedulerConfig,
    AGGREGATE_SOURCES,
};

// ============================================================================
// YAML config structs (deserialization targets)
// ============================================================================

/// Top-level YAML configuration file structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub api: ApiYamlConfig,
    pub sync: SyncYamlConfig,
}

/// Backend API section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiYamlConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for ApiYamlConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".into(),
            request_timeout_secs: 30,
        }
    }
}

/// Cache and scheduling section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncYamlConfig {
    pub poll_interval_ms: u64,
    /// How long a fetched entry counts as fresh; 0 means every read refetches
    pub stale_time_ms: u64,
    pub refetch_on_focus: bool,
    pub optimistic_updates: bool,
    pub dashboard_window: TimeWindow,
}

impl Default for SyncYamlConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 30_000,
            stale_time_ms: 0,
            refetch_on_focus: true,
            optimistic_updates: true,
            dashboard_window: TimeWindow::AllTime,
        }
    }
}

// ============================================================================
// Runtime config (what the engine actually uses)
// ============================================================================

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub api_base_url: String,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    pub stale_time: Duration,
    pub refetch_on_focus: bool,
    pub optimistic_updates: bool,
    pub dashboard_window: TimeWindow,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_yaml(YamlConfig::default())
    }
}

impl Config {
    /// Load configuration from environment variables (and `worksite.yaml` if present).
    /// Equivalent to from_yaml_and_env(None).
    pub fn from_env() -> Result<Self> {
        Self::from_yaml_and_env(None)
    }

    /// Load configuration from an optional YAML file, then override with env vars.
    ///
    /// Priority: env var > YAML > default
    ///
    /// If `yaml_path` is None, tries "worksite.yaml" in CWD. If the file doesn't
    /// exist, falls back to pure env var / defaults.
    pub fn from_yaml_and_env(yaml_path: Option<&Path>) -> Result<Self> {
        let yaml = Self::load_yaml(yaml_path);
        let mut config = Self::from_yaml(yaml);

        if let Ok(url) = std::env::var("WORKSITE_API_URL") {
            config.api_base_url = url;
        }
        if let Some(secs) = env_parse::<u64>("WORKSITE_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = env_parse::<u64>("WORKSITE_POLL_INTERVAL_MS")? {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("WORKSITE_STALE_TIME_MS")? {
            config.stale_time = Duration::from_millis(ms);
        }
        if let Some(window) = env_parse::<TimeWindow>("WORKSITE_DASHBOARD_WINDOW")? {
            config.dashboard_window = window;
        }
        if let Some(enabled) = env_parse::<bool>("WORKSITE_OPTIMISTIC")? {
            config.optimistic_updates = enabled;
        }
        Ok(config)
    }

    fn from_yaml(yaml: YamlConfig) -> Self {
        Self {
            api_base_url: yaml.api.base_url,
            request_timeout: Duration::from_secs(yaml.api.request_timeout_secs),
            poll_interval: Duration::from_millis(yaml.sync.poll_interval_ms),
            stale_time: Duration::from_millis(yaml.sync.stale_time_ms),
            refetch_on_focus: yaml.sync.refetch_on_focus,
            optimistic_updates: yaml.sync.optimistic_updates,
            dashboard_window: yaml.sync.dashboard_window,
        }
    }

    /// Try to load and parse a YAML config file. Returns defaults on any failure.
    fn load_yaml(yaml_path: Option<&Path>) -> YamlConfig {
        let default_path = Path::new("worksite.yaml");
        let path = yaml_path.unwrap_or(default_path);

        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_yaml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    YamlConfig::default()
                }
            },
            Err(_) => {
                tracing::debug!(
                    "No config file at {}, using env vars / defaults",
                    path.display()
                );
                YamlConfig::default()
            }
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            poll_interval: self.poll_interval,
            refetch_on_focus: self.refetch_on_focus,
            dashboard_window: self.dashboard_window,
        }
    }
}

/// Parse an env var if set. A set but malformed value is an error.
fn env_parse<T>(var: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("invalid value '{raw}' for {var}: {e}")),
        Err(_) => Ok(None),
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Every component wired around one shared cache
#[derive(Clone)]
pub struct SyncEngine {
    pub store: Arc<EntityCacheStore>,
    pub scheduler: FetchScheduler,
    pub broadcaster: InvalidationBroadcaster,
    pub mutations: MutationCoordinator,
    pub notifier: ViewNotifier,
    config: Arc<Config>,
}

impl SyncEngine {
    /// Create an engine talking to the configured HTTP API
    pub fn new(config: Config, session: Arc<dyn SessionProvider>) -> Result<Self> {
        let backend = HttpBackend::new(config.api_base_url.clone(), config.request_timeout, session)?;
        tracing::info!(api = %backend.base_url(), "Sync engine created");
        Ok(Self::with_backend(config, Arc::new(backend)))
    }

    /// Create an engine over any backend (e.g. `MockBackend` in tests)
    pub fn with_backend(config: Config, backend: Arc<dyn Backend>) -> Self {
        let store = Arc::new(EntityCacheStore::new(config.stale_time));
        let scheduler = FetchScheduler::new(store.clone(), backend.clone(), config.scheduler_config());
        let broadcaster = InvalidationBroadcaster::new(store.clone(), scheduler.clone());
        let notifier = ViewNotifier::default();
        let mutations = MutationCoordinator::new(
            store.clone(),
            backend,
            broadcaster.clone(),
            Arc::new(notifier.clone()),
            config.optimistic_updates,
        );
        Self {
            store,
            scheduler,
            broadcaster,
            mutations,
            notifier,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Drop every cached entry and discard reads still in flight (logout)
    pub fn reset(&self) {
        self.scheduler.reset();
        self.store.reset();
        tracing::info!("Sync engine reset");
    }

    /// Bring every source collection up to date
    pub async fn load_sources(&self) -> Result<(), FetchError> {
        let reads = AGGREGATE_SOURCES
            .iter()
            .map(|kind| self.scheduler.ensure_fresh(&cache::CacheKey::Collection(*kind)));
        for result in futures::future::join_all(reads).await {
            result?;
        }
        Ok(())
    }

    /// Fresh dashboard statistics for `filter` as of `today`
    pub async fn stats(&self, filter: &StatsFilter, today: NaiveDate) -> Result<DashboardStats, FetchError> {
        self.load_sources().await?;
        Ok(stats::dashboard_stats(
            &self.store.dashboard_snapshot(),
            filter,
            today,
        ))
    }

    /// Fresh report for one project; `None` if the project does not exist
    pub async fn project_report(
        &self,
        project_id: &str,
        window: TimeWindow,
        today: NaiveDate,
    ) -> Result<Option<ProjectReport>, FetchError> {
        self.load_sources().await?;
        Ok(stats::project_report(
            &self.store.dashboard_snapshot(),
            project_id,
            window,
            today,
        ))
    }

    pub async fn payment_summary(
        &self,
        window: TimeWindow,
        today: NaiveDate,
    ) -> Result<PaymentSummary, FetchError> {
        self.scheduler
            .ensure_fresh(&cache::CacheKey::Collection(models::EntityKind::Payment))
            .await?;
        Ok(stats::payment_summary(
            &self.store.dashboard_snapshot().payments,
            window,
            today,
        ))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod config_tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_yaml_config_loading() {
        let yaml = r#"
api:
  base_url: https://worksite.example.com/api
  request_timeout_secs: 10

sync:
  poll_interval_ms: 5000
  stale_time_ms: 1000
  refetch_on_focus: false
  optimistic_updates: false
  dashboard_window: quarter
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.api.base_url, "https://worksite.example.com/api");
        assert_eq!(config.api.request_timeout_secs, 10);
        assert_eq!(config.sync.poll_interval_ms, 5000);
        assert!(!config.sync.refetch_on_focus);
        assert_eq!(config.sync.dashboard_window, TimeWindow::Quarter);
    }

    #[test]
    fn test_yaml_defaults() {
        let config = YamlConfig::default();
        assert_eq!(config.api.base_url, "http://localhost:3000/api");
        assert_eq!(config.sync.poll_interval_ms, 30_000);
        assert_eq!(config.sync.stale_time_ms, 0);
        assert!(config.sync.optimistic_updates);
        assert_eq!(config.sync.dashboard_window, TimeWindow::AllTime);

        // Missing sections keep their defaults
        let partial: YamlConfig = serde_yaml::from_str("sync:\n  stale_time_ms: 250\n").unwrap();
        assert_eq!(partial.sync.stale_time_ms, 250);
        assert_eq!(partial.sync.poll_interval_ms, 30_000);
        assert_eq!(partial.api.request_timeout_secs, 30);
    }

    /// Combined test for YAML file loading and env var overrides.
    /// Runs as a single test to avoid parallel env var race conditions.
    #[test]
    fn test_yaml_and_env_lifecycle() {
        fn clear_env() {
            for var in &[
                "WORKSITE_API_URL",
                "WORKSITE_REQUEST_TIMEOUT_SECS",
                "WORKSITE_POLL_INTERVAL_MS",
                "WORKSITE_STALE_TIME_MS",
                "WORKSITE_DASHBOARD_WINDOW",
                "WORKSITE_OPTIMISTIC",
            ] {
                std::env::remove_var(var);
            }
        }

        // --- Phase 1: YAML values loaded correctly ---
        let yaml = r#"
api:
  base_url: http://yaml-host/api
sync:
  poll_interval_ms: 1500
  dashboard_window: month
"#;
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("worksite.yaml");
        let mut file = std::fs::File::create(&file_path).unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        clear_env();

        let config = Config::from_yaml_and_env(Some(&file_path)).unwrap();
        assert_eq!(config.api_base_url, "http://yaml-host/api");
        assert_eq!(config.poll_interval, Duration::from_millis(1500));
        assert_eq!(config.dashboard_window, TimeWindow::Month);
        assert_eq!(config.request_timeout, Duration::from_secs(30));

        // --- Phase 2: Env vars override YAML ---
        std::env::set_var("WORKSITE_API_URL", "http://env-host/api");
        std::env::set_var("WORKSITE_POLL_INTERVAL_MS", "250");
        std::env::set_var("WORKSITE_DASHBOARD_WINDOW", "year");
        std::env::set_var("WORKSITE_OPTIMISTIC", "false");

        let config = Config::from_yaml_and_env(Some(&file_path)).unwrap();
        assert_eq!(config.api_base_url, "http://env-host/api");
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.dashboard_window, TimeWindow::Year);
        assert!(!config.optimistic_updates);

        // --- Phase 3: Malformed env values are rejected ---
        std::env::set_var("WORKSITE_STALE_TIME_MS", "soon");
        assert!(Config::from_yaml_and_env(Some(&file_path)).is_err());
        std::env::remove_var("WORKSITE_STALE_TIME_MS");

        // --- Phase 4: Missing file falls back to defaults ---
        clear_env();
        let missing = dir.path().join("nope.yaml");
        let config = Config::from_yaml_and_env(Some(&missing)).unwrap();
        assert_eq!(config, Config::default());
    }
}

#[cfg(test)]
mod engine_tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::models::EntityKind;
    use crate::sync::MutationOptions;
    use crate::test_helpers::{project_json, seeded_backend, spending_json};
    use serde_json::json;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    #[tokio::test]
    async fn test_stats_load_sources_once() {
        let backend = seeded_backend(
            vec![project_json("p-1", json!(100000), "2024-01-01")],
            vec![spending_json("sp-1", json!(25000), Some("p-1"), "2024-06-01")],
        )
        .await;
        let mut config = Config::default();
        config.stale_time = Duration::from_secs(60);
        let engine = SyncEngine::with_backend(config, backend.clone());

        let stats = engine.stats(&StatsFilter::default(), today()).await.unwrap();
        assert_eq!(stats.projects.total, 1);
        assert_eq!(stats.utilization_percent, 25.0);

        engine.stats(&StatsFilter::default(), today()).await.unwrap();
        assert_eq!(backend.call_count("GET /spendings").await, 1);
    }

    #[tokio::test]
    async fn test_source_failure_surfaces_as_fetch_error() {
        let backend = Arc::new(MockBackend::new());
        backend.fail_reads(EntityKind::Inventory, true).await;
        let engine = SyncEngine::with_backend(Config::default(), backend);

        let err = engine
            .stats(&StatsFilter::default(), today())
            .await
            .unwrap_err();
        assert_eq!(err.key, cache::CacheKey::Collection(EntityKind::Inventory));
    }

    #[tokio::test]
    async fn test_reset_clears_cache() {
        let backend = seeded_backend(vec![project_json("p-1", json!(10), "2024-01-01")], vec![]).await;
        let engine = SyncEngine::with_backend(Config::default(), backend);
        engine.load_sources().await.unwrap();
        assert!(!engine.store.keys().is_empty());

        engine.reset();
        assert!(engine.store.keys().is_empty());
    }

    #[tokio::test]
    async fn test_mutations_publish_to_engine_notifier() {
        let backend = seeded_backend(vec![project_json("p-1", json!(10), "2024-01-01")], vec![]).await;
        let engine = SyncEngine::with_backend(Config::default(), backend);
        let mut added = engine.notifier.subscribe("spendingAdded");

        engine
            .mutations
            .execute(
                sync::Mutation::create(
                    EntityKind::Spending,
                    json!({"amount": 5, "projectId": "p-1", "date": "2024-01-02"}),
                ),
                MutationOptions::optimistic(false),
            )
            .await
            .unwrap();
        assert_eq!(added.try_recv().unwrap().entity["projectId"], "p-1");
    }
}
