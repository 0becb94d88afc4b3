//! Entity cache
//!
//! This module provides:
//! - `CacheKey`: identifies a cached collection, project detail or derived aggregate
//! - `EntityCacheStore`: the shared in-memory store with staleness tracking,
//!   optimistic patching with per-record revert, exact snapshot/restore and
//!   change notifications

mod keys;
mod store;

pub use keys::CacheKey;
pub use store::{
    CacheChange, CacheEntry, CacheSubscription, CachedCollection, ChangeKind, Collection,
    EntityCacheStore, PatchUndo, StoreSnapshot,
};
