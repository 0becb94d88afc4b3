//! In-memory keyed store of entity collections
//!
//! Every entry holds the raw JSON collection exactly as the backend (or an
//! optimistic patch) produced it, plus its freshness bookkeeping. Readers get
//! `Arc` snapshots and must treat them as immutable; all writes go through
//! [`EntityCacheStore::set`], [`EntityCacheStore::patch`] and friends.
//!
//! Locks are held only for the duration of a single synchronous operation and
//! never across an `.await`, so each write runs to completion without
//! interleaving with other tasks.

use super::CacheKey;
use crate::models::{
    decode_records, record_id, Employee, EntityKind, InventoryItem, Payment, Project, Section, Spending,
};
use crate::stats::{DashboardSnapshot, DashboardStats};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Immutable snapshot of a cached collection
pub type Collection = Arc<Vec<Value>>;

const CHANGE_CAPACITY: usize = 256;

/// One cached collection with its freshness bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub data: Collection,
    /// Explicitly invalidated since the last successful fetch
    pub invalidated: bool,
    pub invalidated_at: Option<DateTime<Utc>>,
    pub last_fetched_at: Option<DateTime<Utc>>,
    /// Message of the last failed read, cleared by the next successful one
    pub failure: Option<String>,
    /// Holds an optimistic patch that has not been reconciled yet
    pub optimistic: bool,
    /// Store-wide revision of the last write to this entry
    pub version: u64,
}

impl CacheEntry {
    fn empty() -> Self {
        Self {
            data: Arc::new(Vec::new()),
            invalidated: false,
            invalidated_at: None,
            last_fetched_at: None,
            failure: None,
            optimistic: false,
            version: 0,
        }
    }
}

/// What [`EntityCacheStore::get`] hands out
#[derive(Debug, Clone, PartialEq)]
pub struct CachedCollection {
    pub data: Collection,
    pub is_stale: bool,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub failure: Option<String>,
    pub optimistic: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Set,
    Patched,
    Reconciled,
    Restored,
    Reset,
}

/// Notification sent to subscribers after a write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheChange {
    pub key: CacheKey,
    pub kind: ChangeKind,
}

/// Exact copy of a set of entries, used to roll back optimistic patches
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSnapshot {
    entries: Vec<(CacheKey, Option<CacheEntry>)>,
}

impl StoreSnapshot {
    pub fn keys(&self) -> impl Iterator<Item = &CacheKey> {
        self.entries.iter().map(|(key, _)| key)
    }
}

/// One optimistic patch, recorded so it can be reverted on its own
#[derive(Debug, Clone)]
pub struct PatchUndo {
    key: CacheKey,
    before: Option<CacheEntry>,
    after: Collection,
    after_version: u64,
}

impl PatchUndo {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

/// The shared entity cache
pub struct EntityCacheStore {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    changes: broadcast::Sender<CacheChange>,
    stale_time: chrono::Duration,
    revision: AtomicU64,
}

impl EntityCacheStore {
    /// Create an empty store. Entries older than `stale_time` count as stale.
    pub fn new(stale_time: Duration) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            entries: RwLock::new(HashMap::new()),
            changes,
            stale_time: chrono::Duration::from_std(stale_time)
                .unwrap_or_else(|_| chrono::Duration::zero()),
            revision: AtomicU64::new(0),
        }
    }

    // Called with the write lock held
    fn next_version(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, key: CacheKey, kind: ChangeKind) {
        // No subscribers is fine
        let _ = self.changes.send(CacheChange { key, kind });
    }

    fn entry_is_stale(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        if entry.invalidated || entry.failure.is_some() {
            return true;
        }
        match entry.last_fetched_at {
            Some(fetched_at) => now - fetched_at >= self.stale_time,
            None => true,
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Current collection for `key` with its staleness. Unknown keys read as an
    /// empty, stale, never-fetched collection.
    pub fn get(&self, key: &CacheKey) -> CachedCollection {
        let now = Utc::now();
        let entries = self.read();
        match entries.get(key) {
            Some(entry) => CachedCollection {
                data: entry.data.clone(),
                is_stale: self.entry_is_stale(entry, now),
                last_fetched_at: entry.last_fetched_at,
                failure: entry.failure.clone(),
                optimistic: entry.optimistic,
            },
            None => CachedCollection {
                data: Arc::new(Vec::new()),
                is_stale: true,
                last_fetched_at: None,
                failure: None,
                optimistic: false,
            },
        }
    }

    pub fn data(&self, key: &CacheKey) -> Collection {
        self.read()
            .get(key)
            .map(|entry| entry.data.clone())
            .unwrap_or_default()
    }

    pub fn is_stale(&self, key: &CacheKey) -> bool {
        let now = Utc::now();
        self.read()
            .get(key)
            .map_or(true, |entry| self.entry_is_stale(entry, now))
    }

    /// True when the entry was explicitly marked stale and not refetched since
    pub fn is_invalidated(&self, key: &CacheKey) -> bool {
        self.read().get(key).is_some_and(|entry| entry.invalidated)
    }

    /// True when the entry has no usable server data: never fetched,
    /// invalidated or failed. Age alone does not count.
    pub fn needs_load(&self, key: &CacheKey) -> bool {
        self.read().get(key).map_or(true, |entry| {
            entry.last_fetched_at.is_none() || entry.invalidated || entry.failure.is_some()
        })
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.read().contains_key(key)
    }

    pub fn keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = self.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Keys that hold server data and are stale now
    pub fn stale_fetched_keys(&self) -> Vec<CacheKey> {
        let now = Utc::now();
        let mut keys: Vec<CacheKey> = self
            .read()
            .iter()
            .filter(|(_, entry)| entry.last_fetched_at.is_some() && self.entry_is_stale(entry, now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Replace the collection with fresh server data
    pub fn set(&self, key: CacheKey, records: Vec<Value>) -> Collection {
        self.store_fetched(key, records, None)
    }

    /// Store the result of a read issued at `requested_at`. An invalidation
    /// that arrived while the read was in flight stays in effect.
    pub fn set_fetched(
        &self,
        key: CacheKey,
        records: Vec<Value>,
        requested_at: DateTime<Utc>,
    ) -> Collection {
        self.store_fetched(key, records, Some(requested_at))
    }

    fn store_fetched(
        &self,
        key: CacheKey,
        records: Vec<Value>,
        requested_at: Option<DateTime<Utc>>,
    ) -> Collection {
        let data: Collection = Arc::new(records);
        let still_invalidated = {
            let mut entries = self.write();
            let entry = entries.entry(key.clone()).or_insert_with(CacheEntry::empty);
            let keep = match (requested_at, entry.invalidated_at) {
                (Some(requested), Some(invalidated)) => entry.invalidated && invalidated > requested,
                _ => false,
            };
            entry.data = data.clone();
            if !keep {
                entry.invalidated = false;
                entry.invalidated_at = None;
            }
            entry.failure = None;
            entry.optimistic = false;
            entry.last_fetched_at = Some(Utc::now());
            entry.version = self.next_version();
            keep
        };
        debug!(key = %key, records = data.len(), still_invalidated, "Cache entry set");
        self.notify(key, ChangeKind::Set);
        data
    }

    /// Apply an optimistic transform without a network round trip. The entry
    /// stays flagged as optimistic until the next `set`, `reconcile` or `restore`.
    pub fn patch<F>(&self, key: CacheKey, updater: F) -> Collection
    where
        F: FnOnce(&[Value]) -> Vec<Value>,
    {
        self.patch_undoable(key, updater).after
    }

    /// Like [`patch`](Self::patch), returning what [`revert`](Self::revert)
    /// needs to take this patch back later
    pub fn patch_undoable<F>(&self, key: CacheKey, updater: F) -> PatchUndo
    where
        F: FnOnce(&[Value]) -> Vec<Value>,
    {
        let undo = {
            let mut entries = self.write();
            let before = entries.get(&key).cloned();
            let entry = entries.entry(key.clone()).or_insert_with(CacheEntry::empty);
            let data: Collection = Arc::new(updater(&entry.data));
            entry.data = data.clone();
            entry.optimistic = true;
            entry.version = self.next_version();
            PatchUndo {
                key: key.clone(),
                before,
                after: data,
                after_version: entry.version,
            }
        };
        debug!(key = %key, records = undo.after.len(), "Cache entry patched optimistically");
        self.notify(key, ChangeKind::Patched);
        undo
    }

    /// Take back one optimistic patch. If nothing wrote the entry since, it is
    /// restored exactly. Otherwise only the record with `id` is reverted, and
    /// only while it still looks the way the patch left it; other records and
    /// the freshness flags stay as they are now.
    pub fn revert(&self, undo: PatchUndo, id: &str) {
        let PatchUndo {
            key,
            before,
            after,
            after_version,
        } = undo;
        let reverted = {
            let mut entries = self.write();
            match entries.get(&key).map(|entry| entry.version) {
                None => false,
                Some(version) if version == after_version => {
                    match before {
                        Some(entry) => entries.insert(key.clone(), entry),
                        None => entries.remove(&key),
                    };
                    true
                }
                Some(_) => match entries.get_mut(&key) {
                    Some(entry) => match revert_record(entry, before.as_ref(), &after, id) {
                        Some(data) => {
                            entry.data = Arc::new(data);
                            entry.version = self.next_version();
                            true
                        }
                        None => false,
                    },
                    None => false,
                },
            }
        };
        if reverted {
            debug!(key = %key, id, "Optimistic patch reverted");
            self.notify(key, ChangeKind::Restored);
        }
    }

    /// Apply an authoritative transform to an existing entry (e.g. swap a
    /// temporary record for the server's). Missing entries are left alone.
    pub fn reconcile<F>(&self, key: &CacheKey, updater: F) -> Option<Collection>
    where
        F: FnOnce(&[Value]) -> Vec<Value>,
    {
        let data = {
            let mut entries = self.write();
            let entry = entries.get_mut(key)?;
            let data: Collection = Arc::new(updater(&entry.data));
            entry.data = data.clone();
            entry.optimistic = false;
            entry.version = self.next_version();
            data
        };
        self.notify(key.clone(), ChangeKind::Reconciled);
        Some(data)
    }

    /// Flag an entry as stale. Returns false if there was nothing cached.
    pub fn mark_stale(&self, key: &CacheKey) -> bool {
        let mut entries = self.write();
        let marked = match entries.get_mut(key) {
            Some(entry) => {
                entry.invalidated = true;
                entry.invalidated_at = Some(Utc::now());
                entry.version = self.next_version();
                true
            }
            None => false,
        };
        drop(entries);
        if marked {
            debug!(key = %key, "Cache entry marked stale");
        }
        marked
    }

    /// Record a failed read. Previous data stays in place.
    pub fn mark_failed(&self, key: &CacheKey, message: impl Into<String>) {
        let mut entries = self.write();
        let entry = entries.entry(key.clone()).or_insert_with(CacheEntry::empty);
        entry.failure = Some(message.into());
        entry.version = self.next_version();
    }

    /// Copy the given entries so they can be restored exactly
    pub fn capture(&self, keys: &[CacheKey]) -> StoreSnapshot {
        let entries = self.read();
        StoreSnapshot {
            entries: keys
                .iter()
                .map(|key| (key.clone(), entries.get(key).cloned()))
                .collect(),
        }
    }

    /// Put captured entries back, removing those that did not exist
    pub fn restore(&self, snapshot: StoreSnapshot) {
        let keys: Vec<CacheKey> = snapshot.keys().cloned().collect();
        {
            let mut entries = self.write();
            for (key, entry) in snapshot.entries {
                match entry {
                    Some(entry) => {
                        entries.insert(key, entry);
                    }
                    None => {
                        entries.remove(&key);
                    }
                }
            }
        }
        for key in keys {
            self.notify(key, ChangeKind::Restored);
        }
    }

    /// Drop every entry (e.g. on logout)
    pub fn reset(&self) {
        let keys: Vec<CacheKey> = self.write().drain().map(|(key, _)| key).collect();
        info!(entries = keys.len(), "Entity cache reset");
        for key in keys {
            self.notify(key, ChangeKind::Reset);
        }
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Receive every change notification
    pub fn subscribe(&self) -> broadcast::Receiver<CacheChange> {
        self.changes.subscribe()
    }

    /// Receive change notifications for one key only
    pub fn subscribe_key(&self, key: CacheKey) -> CacheSubscription {
        CacheSubscription {
            key,
            rx: self.changes.subscribe(),
        }
    }

    // ========================================================================
    // Typed views
    // ========================================================================

    fn decoded<T: crate::models::Entity>(&self, kind: EntityKind) -> Vec<T> {
        decode_records(&self.data(&CacheKey::Collection(kind)))
    }

    /// Decode every cached collection for the stats engine
    pub fn dashboard_snapshot(&self) -> DashboardSnapshot {
        DashboardSnapshot {
            projects: self.decoded::<Project>(EntityKind::Project),
            sections: self.decoded::<Section>(EntityKind::Section),
            spendings: self.decoded::<Spending>(EntityKind::Spending),
            inventory: self.decoded::<InventoryItem>(EntityKind::Inventory),
            employees: self.decoded::<Employee>(EntityKind::Employee),
            payments: self.decoded::<Payment>(EntityKind::Payment),
        }
    }

    /// A project from its detail entry, falling back to the collection
    pub fn project(&self, id: &str) -> Option<Project> {
        let detail: Vec<Project> = decode_records(&self.data(&CacheKey::project_detail(id)));
        detail
            .into_iter()
            .find(|p| p.id == id)
            .or_else(|| {
                self.decoded::<Project>(EntityKind::Project)
                    .into_iter()
                    .find(|p| p.id == id)
            })
    }

    /// The last derived dashboard statistics, if computed
    pub fn dashboard_aggregate(&self) -> Option<DashboardStats> {
        self.data(&CacheKey::DashboardAggregate)
            .first()
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }
}

fn position_of(records: &[Value], id: &str) -> Option<usize> {
    records
        .iter()
        .position(|record| record_id(record).as_deref() == Some(id))
}

/// New data for `entry` with the record `id` put back as it was before the
/// patch, or `None` when someone else has written that record since
fn revert_record(
    entry: &CacheEntry,
    before: Option<&CacheEntry>,
    after: &[Value],
    id: &str,
) -> Option<Vec<Value>> {
    let before_data: &[Value] = before.map(|e| e.data.as_slice()).unwrap_or(&[]);
    let original = position_of(before_data, id).map(|i| (i, &before_data[i]));
    let patched = position_of(after, id).map(|i| &after[i]);
    let current = position_of(&entry.data, id);

    let mut data = entry.data.to_vec();
    match (original, patched, current) {
        // Created: drop the placeholder
        (None, Some(patched), Some(i)) if data[i] == *patched => {
            data.remove(i);
        }
        // Updated: put the old record back
        (Some((_, original)), Some(patched), Some(i)) if data[i] == *patched => {
            data[i] = original.clone();
        }
        // Deleted: re-insert where it was, unless a read has replaced the data
        (Some((index, original)), None, None)
            if entry.last_fetched_at == before.and_then(|e| e.last_fetched_at) =>
        {
            data.insert(index.min(data.len()), original.clone());
        }
        _ => return None,
    }
    Some(data)
}

impl Default for EntityCacheStore {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

/// Change notifications filtered to one key
pub struct CacheSubscription {
    key: CacheKey,
    rx: broadcast::Receiver<CacheChange>,
}

impl CacheSubscription {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Wait for the next change of this key. `None` once the store is gone.
    pub async fn changed(&mut self) -> Option<CacheChange> {
        loop {
            match self.rx.recv().await {
                Ok(change) if change.key == self.key => return Some(change),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(key = %self.key, skipped, "Cache subscription lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`changed`](Self::changed)
    pub fn try_changed(&mut self) -> Option<CacheChange> {
        loop {
            match self.rx.try_recv() {
                Ok(change) if change.key == self.key => return Some(change),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn projects() -> CacheKey {
        CacheKey::Collection(EntityKind::Project)
    }

    #[test]
    fn test_unknown_key_is_empty_and_stale() {
        let store = EntityCacheStore::default();
        let cached = store.get(&projects());
        assert!(cached.data.is_empty());
        assert!(cached.is_stale);
        assert!(cached.last_fetched_at.is_none());
        assert!(store.needs_load(&projects()));
    }

    #[test]
    fn test_set_then_fresh_with_stale_time() {
        let store = EntityCacheStore::new(Duration::from_secs(60));
        store.set(projects(), vec![json!({"id": "p-1"})]);

        let cached = store.get(&projects());
        assert_eq!(cached.data.len(), 1);
        assert!(!cached.is_stale);
        assert!(cached.last_fetched_at.is_some());
        assert!(!store.needs_load(&projects()));

        assert!(store.mark_stale(&projects()));
        assert!(store.is_stale(&projects()));
        assert!(store.is_invalidated(&projects()));
        assert!(store.needs_load(&projects()));
    }

    #[test]
    fn test_zero_stale_time_is_immediately_stale() {
        let store = EntityCacheStore::default();
        store.set(projects(), vec![]);
        assert!(store.is_stale(&projects()));
        // ...but it does not need a load: it holds server data
        assert!(!store.needs_load(&projects()));
        assert_eq!(store.stale_fetched_keys(), vec![projects()]);
    }

    #[test]
    fn test_mark_stale_unknown_key_is_noop() {
        let store = EntityCacheStore::default();
        assert!(!store.mark_stale(&projects()));
        assert!(store.keys().is_empty());
    }

    #[test]
    fn test_patch_flags_optimistic_until_set() {
        let store = EntityCacheStore::new(Duration::from_secs(60));
        store.set(projects(), vec![json!({"id": "p-1"})]);
        store.patch(projects(), |records| {
            let mut next = records.to_vec();
            next.push(json!({"id": "temp-1"}));
            next
        });

        let cached = store.get(&projects());
        assert_eq!(cached.data.len(), 2);
        assert!(cached.optimistic);

        store.set(projects(), vec![json!({"id": "p-1"}), json!({"id": "p-2"})]);
        assert!(!store.get(&projects()).optimistic);
    }

    #[test]
    fn test_failed_read_keeps_data() {
        let store = EntityCacheStore::new(Duration::from_secs(60));
        store.set(projects(), vec![json!({"id": "p-1"})]);
        store.mark_failed(&projects(), "502 Bad Gateway");

        let cached = store.get(&projects());
        assert_eq!(cached.data.len(), 1);
        assert!(cached.is_stale);
        assert_eq!(cached.failure.as_deref(), Some("502 Bad Gateway"));
    }

    #[test]
    fn test_capture_restore_is_exact() {
        let store = EntityCacheStore::default();
        let spendings = CacheKey::Collection(EntityKind::Spending);
        store.set(projects(), vec![json!({"id": "p-1", "budget": 10})]);
        store.mark_stale(&projects());

        let keys = vec![projects(), spendings.clone()];
        let before = store.capture(&keys);

        store.patch(projects(), |_| vec![]);
        store.patch(spendings.clone(), |_| vec![json!({"id": "temp"})]);
        assert_ne!(store.capture(&keys), before);

        store.restore(before.clone());
        assert_eq!(store.capture(&keys), before);
        // Entries that did not exist before are removed again
        assert!(!store.keys().contains(&spendings));
    }

    #[test]
    fn test_revert_untouched_entry_is_exact() {
        let store = EntityCacheStore::new(Duration::from_secs(60));
        store.set(projects(), vec![json!({"id": "p-1", "budget": 10})]);
        let before = store.capture(&[projects()]);

        let undo = store.patch_undoable(projects(), |records| {
            let mut next = records.to_vec();
            next.push(json!({"id": "temp-1"}));
            next
        });
        store.revert(undo, "temp-1");
        assert_eq!(store.capture(&[projects()]), before);
    }

    #[test]
    fn test_revert_after_newer_write_touches_only_its_record() {
        let store = EntityCacheStore::new(Duration::from_secs(60));
        store.set(projects(), vec![json!({"id": "p-1", "budget": 10})]);

        let undo = store.patch_undoable(projects(), |records| {
            let mut next = records.to_vec();
            next.push(json!({"id": "temp-1"}));
            next
        });
        store.reconcile(&projects(), |records| {
            let mut next = records.to_vec();
            next.push(json!({"id": "p-2"}));
            next
        });
        store.mark_stale(&projects());

        store.revert(undo, "temp-1");
        let data = store.data(&projects());
        assert_eq!(data.as_slice(), &[json!({"id": "p-1", "budget": 10}), json!({"id": "p-2"})]);
        assert!(store.is_invalidated(&projects()));
    }

    #[test]
    fn test_revert_leaves_record_rewritten_by_someone_else() {
        let store = EntityCacheStore::new(Duration::from_secs(60));
        store.set(projects(), vec![json!({"id": "p-1", "budget": 10})]);

        let undo = store.patch_undoable(projects(), |_| vec![json!({"id": "p-1", "budget": 20})]);
        store.set(projects(), vec![json!({"id": "p-1", "budget": 30})]);

        store.revert(undo, "p-1");
        assert_eq!(store.data(&projects())[0]["budget"], 30);
    }

    #[test]
    fn test_revert_after_reset_does_nothing() {
        let store = EntityCacheStore::default();
        let undo = store.patch_undoable(projects(), |_| vec![json!({"id": "temp-1"})]);
        store.reset();
        store.revert(undo, "temp-1");
        assert!(!store.contains(&projects()));
    }

    #[test]
    fn test_invalidation_during_read_survives_it() {
        let store = EntityCacheStore::new(Duration::from_secs(60));
        store.set(projects(), vec![json!({"id": "p-1"})]);

        let requested_at = Utc::now() - chrono::Duration::milliseconds(10);
        store.mark_stale(&projects());
        store.set_fetched(projects(), vec![json!({"id": "p-1"})], requested_at);
        assert!(store.is_invalidated(&projects()));

        store.set_fetched(projects(), vec![], Utc::now());
        assert!(!store.is_invalidated(&projects()));
    }

    #[test]
    fn test_reconcile_skips_missing_entry() {
        let store = EntityCacheStore::default();
        assert!(store.reconcile(&projects(), |_| vec![json!({"id": "x"})]).is_none());
        assert!(store.keys().is_empty());
    }

    #[test]
    fn test_subscribe_key_filters() {
        let store = EntityCacheStore::default();
        let mut sub = store.subscribe_key(projects());

        store.set(CacheKey::Collection(EntityKind::Section), vec![]);
        store.set(projects(), vec![]);
        store.patch(projects(), |r| r.to_vec());

        assert_eq!(sub.try_changed().map(|c| c.kind), Some(ChangeKind::Set));
        assert_eq!(sub.try_changed().map(|c| c.kind), Some(ChangeKind::Patched));
        assert_eq!(sub.try_changed(), None);
    }

    #[test]
    fn test_reset_discards_everything() {
        let store = EntityCacheStore::default();
        let mut rx = store.subscribe();
        store.set(projects(), vec![json!({"id": "p-1"})]);
        store.reset();

        assert!(store.keys().is_empty());
        assert_eq!(rx.try_recv().unwrap().kind, ChangeKind::Set);
        assert_eq!(rx.try_recv().unwrap().kind, ChangeKind::Reset);
    }

    #[test]
    fn test_project_prefers_detail_entry() {
        let store = EntityCacheStore::default();
        store.set(projects(), vec![json!({"id": "p-1", "budget": 10})]);
        assert_eq!(store.project("p-1").unwrap().budget, 10.into());

        store.set(
            CacheKey::project_detail("p-1"),
            vec![json!({"id": "p-1", "budget": 20})],
        );
        assert_eq!(store.project("p-1").unwrap().budget, 20.into());
        assert!(store.project("p-404").is_none());
    }

    #[test]
    fn test_dashboard_snapshot_decodes_collections() {
        let store = EntityCacheStore::default();
        store.set(
            CacheKey::Collection(EntityKind::Spending),
            vec![json!({"id": "s-1", "amount": "12"}), json!({"amount": 3})],
        );
        let snapshot = store.dashboard_snapshot();
        assert_eq!(snapshot.spendings.len(), 1);
        assert!(snapshot.projects.is_empty());
    }
}
