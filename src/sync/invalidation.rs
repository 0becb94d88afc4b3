//! Invalidation broadcaster
//!
//! Maps a mutated entity type to the cache keys derived from it and marks them
//! stale. Keys feeding a visible view (an active watcher) are refetched right
//! away; the rest wait for the next poll tick.

use super::scheduler::{FetchError, FetchResult, FetchScheduler};
use crate::cache::{CacheKey, EntityCacheStore};
use crate::models::EntityKind;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Projects whose detail keys are affected by a mutation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationScope {
    pub project_ids: Vec<String>,
}

impl InvalidationScope {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn project(project_id: impl Into<String>) -> Self {
        Self {
            project_ids: vec![project_id.into()],
        }
    }

    /// Add another project (e.g. the previous owner of a moved record)
    pub fn and_project(mut self, project_id: impl Into<String>) -> Self {
        let project_id = project_id.into();
        if !self.project_ids.contains(&project_id) {
            self.project_ids.push(project_id);
        }
        self
    }
}

/// Dependent cache keys of a mutated entity type
///
/// | mutated   | dependent keys                                                |
/// |-----------|---------------------------------------------------------------|
/// | project   | projects, project detail, dashboard-aggregate                 |
/// | section   | sections, projects, dashboard-aggregate, project detail       |
/// | spending  | spendings, dashboard-aggregate, project detail                |
/// | inventory | inventory, spendings, dashboard-aggregate, project detail     |
/// | employee  | employees, sections                                           |
/// | payment   | payments, employees                                           |
///
/// Project detail keys are only included for the projects in `scope`.
pub fn dependents(kind: EntityKind, scope: &InvalidationScope) -> Vec<CacheKey> {
    use EntityKind::*;

    let mut keys = match kind {
        Project => vec![CacheKey::Collection(Project), CacheKey::DashboardAggregate],
        Section => vec![
            CacheKey::Collection(Section),
            CacheKey::Collection(Project),
            CacheKey::DashboardAggregate,
        ],
        Spending => vec![CacheKey::Collection(Spending), CacheKey::DashboardAggregate],
        Inventory => vec![
            CacheKey::Collection(Inventory),
            CacheKey::Collection(Spending),
            CacheKey::DashboardAggregate,
        ],
        Employee => return vec![CacheKey::Collection(Employee), CacheKey::Collection(Section)],
        Payment => return vec![CacheKey::Collection(Payment), CacheKey::Collection(Employee)],
    };
    keys.extend(scope.project_ids.iter().map(CacheKey::project_detail));
    keys
}

/// Result of one invalidation
#[derive(Debug)]
pub struct Invalidation {
    pub entity_type: EntityKind,
    /// Cached keys that were marked stale
    pub marked: Vec<CacheKey>,
    /// Watched keys being refetched now
    pub refreshed: Vec<CacheKey>,
    /// Stale keys left for the next poll tick
    pub deferred: Vec<CacheKey>,
    tasks: Vec<JoinHandle<FetchResult>>,
}

impl Invalidation {
    /// Wait for the immediate refetches. Returns the first failure.
    pub async fn settled(self) -> Result<(), FetchError> {
        let mut first_error = None;
        for task in self.tasks {
            match task.await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(e) => warn!(error = %e, "Refetch task panicked"),
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[derive(Clone)]
pub struct InvalidationBroadcaster {
    store: Arc<EntityCacheStore>,
    scheduler: FetchScheduler,
}

impl InvalidationBroadcaster {
    pub fn new(store: Arc<EntityCacheStore>, scheduler: FetchScheduler) -> Self {
        Self { store, scheduler }
    }

    /// Mark every key depending on `kind` stale and refetch the watched ones.
    /// The refetches are spawned, not awaited.
    pub fn invalidate(&self, kind: EntityKind, scope: &InvalidationScope) -> Invalidation {
        let mut invalidation = Invalidation {
            entity_type: kind,
            marked: Vec::new(),
            refreshed: Vec::new(),
            deferred: Vec::new(),
            tasks: Vec::new(),
        };

        for key in dependents(kind, scope) {
            let cached = self.store.mark_stale(&key);
            if cached {
                invalidation.marked.push(key.clone());
            }
            if self.scheduler.is_watched(&key) {
                invalidation
                    .tasks
                    .push(tokio::spawn(self.scheduler.refetch(&key)));
                invalidation.refreshed.push(key);
            } else if cached {
                invalidation.deferred.push(key);
            }
        }

        debug!(
            entity_type = %kind,
            marked = invalidation.marked.len(),
            refreshed = invalidation.refreshed.len(),
            deferred = invalidation.deferred.len(),
            "Invalidated dependent keys"
        );
        invalidation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::sync::{PollOptions, SchedulerConfig};
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_spending_dependents_include_linked_project() {
        let keys = dependents(EntityKind::Spending, &InvalidationScope::project("p-1"));
        assert_eq!(
            keys,
            vec![
                CacheKey::Collection(EntityKind::Spending),
                CacheKey::DashboardAggregate,
                CacheKey::project_detail("p-1"),
            ]
        );
        let unlinked = dependents(EntityKind::Spending, &InvalidationScope::none());
        assert!(!unlinked.iter().any(|k| matches!(k, CacheKey::ProjectDetail(_))));
    }

    #[test]
    fn test_dependency_table() {
        let scope = InvalidationScope::project("p-1");
        assert!(dependents(EntityKind::Section, &scope)
            .contains(&CacheKey::Collection(EntityKind::Project)));
        assert!(dependents(EntityKind::Inventory, &scope)
            .contains(&CacheKey::Collection(EntityKind::Spending)));
        assert_eq!(
            dependents(EntityKind::Employee, &scope),
            vec![
                CacheKey::Collection(EntityKind::Employee),
                CacheKey::Collection(EntityKind::Section)
            ]
        );
        assert_eq!(
            dependents(EntityKind::Payment, &scope),
            vec![
                CacheKey::Collection(EntityKind::Payment),
                CacheKey::Collection(EntityKind::Employee)
            ]
        );
        let moved = InvalidationScope::project("p-1").and_project("p-2").and_project("p-1");
        assert_eq!(moved.project_ids, vec!["p-1".to_string(), "p-2".to_string()]);
    }

    #[tokio::test]
    async fn test_invalidate_refreshes_watched_and_defers_the_rest() {
        let backend = Arc::new(MockBackend::new());
        let store = Arc::new(EntityCacheStore::new(Duration::from_secs(60)));
        let scheduler = FetchScheduler::new(store.clone(), backend.clone(), SchedulerConfig::default());
        let broadcaster = InvalidationBroadcaster::new(store.clone(), scheduler.clone());

        let spendings = CacheKey::Collection(EntityKind::Spending);
        let detail = CacheKey::project_detail("p-1");
        backend.seed(EntityKind::Project, vec![json!({"id": "p-1"})]).await;
        scheduler.ensure_fresh(&spendings).await.unwrap();
        scheduler.ensure_fresh(&detail).await.unwrap();

        let mut changes = store.subscribe_key(spendings.clone());
        let _watch = scheduler.watch(spendings.clone(), PollOptions::once());
        tokio::task::yield_now().await;
        // Fresh data: the watch does not read again
        assert_eq!(backend.call_count("GET /spendings").await, 1);

        let invalidation = broadcaster.invalidate(EntityKind::Spending, &InvalidationScope::project("p-1"));
        assert_eq!(invalidation.marked, vec![spendings.clone(), detail.clone()]);
        assert_eq!(invalidation.refreshed, vec![spendings.clone()]);
        assert_eq!(invalidation.deferred, vec![detail.clone()]);
        assert!(store.is_invalidated(&detail));

        invalidation.settled().await.unwrap();
        assert_eq!(backend.call_count("GET /spendings").await, 2);
        assert!(!store.is_invalidated(&spendings));
        assert!(changes.try_changed().is_some());

        // The deferred key is picked up by the next tick
        let summary = scheduler.tick().await;
        assert_eq!(summary.refreshed, vec![detail.clone()]);
        assert!(!store.is_invalidated(&detail));
    }
}
