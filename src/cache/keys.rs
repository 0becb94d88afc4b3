//! Cache keys

use crate::models::EntityKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one entry in the [`EntityCacheStore`](super::EntityCacheStore)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "id")]
pub enum CacheKey {
    /// Full collection of one entity type (`projects`, `spendings`, ...)
    Collection(EntityKind),
    /// A single project fetched through its item endpoint
    ProjectDetail(String),
    /// Dashboard statistics derived from the source collections
    DashboardAggregate,
}

impl CacheKey {
    pub fn collection(kind: EntityKind) -> Self {
        CacheKey::Collection(kind)
    }

    pub fn project_detail(id: impl Into<String>) -> Self {
        CacheKey::ProjectDetail(id.into())
    }

    pub fn is_derived(&self) -> bool {
        matches!(self, CacheKey::DashboardAggregate)
    }
}

impl From<EntityKind> for CacheKey {
    fn from(kind: EntityKind) -> Self {
        CacheKey::Collection(kind)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Collection(kind) => f.write_str(kind.collection()),
            CacheKey::ProjectDetail(id) => write!(f, "projects/{id}"),
            CacheKey::DashboardAggregate => f.write_str("dashboard-aggregate"),
        }
    }
}
