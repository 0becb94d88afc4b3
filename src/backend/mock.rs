//! In-memory mock implementation of Backend for testing without a server.

use super::traits::{Backend, BackendError};
use crate::models::{record_id, EntityKind};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// In-memory mock implementation of Backend.
///
/// Stores collections in a `HashMap` behind an async `RwLock` and records
/// every call as `"<METHOD> /<collection>[/<id>]"`. Reads of selected
/// collections and all mutations can be made to fail, and every call can be
/// delayed to keep requests in flight.
pub struct MockBackend {
    collections: RwLock<HashMap<EntityKind, Vec<Value>>>,
    calls: RwLock<Vec<String>>,
    failing_reads: RwLock<HashSet<EntityKind>>,
    mutation_failure: RwLock<Option<BackendError>>,
    latency: RwLock<Option<Duration>>,
    next_id: AtomicU64,
}

impl MockBackend {
    /// Create a new empty mock backend.
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            calls: RwLock::new(Vec::new()),
            failing_reads: RwLock::new(HashSet::new()),
            mutation_failure: RwLock::new(None),
            latency: RwLock::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Replace a collection's contents
    pub async fn seed(&self, kind: EntityKind, records: Vec<Value>) {
        self.collections.write().await.insert(kind, records);
    }

    pub async fn records(&self, kind: EntityKind) -> Vec<Value> {
        self.collections
            .read()
            .await
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }

    /// Every call made so far, in order
    pub async fn calls(&self) -> Vec<String> {
        self.calls.read().await.clone()
    }

    /// How many times exactly this call was made, e.g. `"GET /projects"`
    pub async fn call_count(&self, call: &str) -> usize {
        self.calls.read().await.iter().filter(|c| *c == call).count()
    }

    pub async fn clear_calls(&self) {
        self.calls.write().await.clear();
    }

    /// Make reads of `kind` fail with a 502 until switched off again
    pub async fn fail_reads(&self, kind: EntityKind, fail: bool) {
        let mut failing = self.failing_reads.write().await;
        if fail {
            failing.insert(kind);
        } else {
            failing.remove(&kind);
        }
    }

    /// Make every create/update/delete fail with `error`, or succeed again with `None`
    pub async fn fail_mutations(&self, error: Option<BackendError>) {
        *self.mutation_failure.write().await = error;
    }

    /// Delay every call by `latency`
    pub async fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write().await = latency;
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    async fn record_call(&self, method: &str, kind: EntityKind, id: Option<&str>) {
        let call = match id {
            Some(id) => format!("{method} /{}/{id}", kind.collection()),
            None => format!("{method} /{}", kind.collection()),
        };
        self.calls.write().await.push(call);

        let latency = *self.latency.read().await;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    async fn check_read(&self, kind: EntityKind) -> Result<(), BackendError> {
        if self.failing_reads.read().await.contains(&kind) {
            return Err(BackendError::Status {
                status: 502,
                message: format!("{} unavailable", kind.collection()),
            });
        }
        Ok(())
    }

    async fn check_mutation(&self) -> Result<(), BackendError> {
        match self.mutation_failure.read().await.clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn generate_id(&self, kind: EntityKind) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        format!("{}-{n}", kind.singular())
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(kind: EntityKind, id: &str) -> BackendError {
    BackendError::NotFound {
        kind,
        id: id.to_string(),
    }
}

fn has_id(record: &Value, id: &str) -> bool {
    record_id(record).as_deref() == Some(id)
}

// ---------------------------------------------------------------------------
// Backend implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl Backend for MockBackend {
    async fn list(&self, kind: EntityKind) -> Result<Vec<Value>, BackendError> {
        self.record_call("GET", kind, None).await;
        self.check_read(kind).await?;
        Ok(self.records(kind).await)
    }

    async fn get(&self, kind: EntityKind, id: &str) -> Result<Value, BackendError> {
        self.record_call("GET", kind, Some(id)).await;
        self.check_read(kind).await?;
        self.collections
            .read()
            .await
            .get(&kind)
            .and_then(|records| records.iter().find(|r| has_id(r, id)).cloned())
            .ok_or_else(|| not_found(kind, id))
    }

    async fn create(&self, kind: EntityKind, record: &Value) -> Result<Value, BackendError> {
        self.record_call("POST", kind, None).await;
        self.check_mutation().await?;

        let mut created = match record {
            Value::Object(map) => map.clone(),
            _ => return Err(BackendError::Status {
                status: 400,
                message: "record must be an object".into(),
            }),
        };
        let keep_id = record_id(record).is_some_and(|id| !id.starts_with("temp-"));
        if !keep_id {
            created.insert("id".into(), Value::String(self.generate_id(kind)));
        }
        let created = Value::Object(created);

        self.collections
            .write()
            .await
            .entry(kind)
            .or_default()
            .push(created.clone());
        Ok(created)
    }

    async fn update(
        &self,
        kind: EntityKind,
        id: &str,
        changes: &Value,
    ) -> Result<Value, BackendError> {
        self.record_call("PUT", kind, Some(id)).await;
        self.check_mutation().await?;

        let mut collections = self.collections.write().await;
        let record = collections
            .get_mut(&kind)
            .and_then(|records| records.iter_mut().find(|r| has_id(r, id)))
            .ok_or_else(|| not_found(kind, id))?;

        if let (Value::Object(target), Value::Object(changes)) = (&mut *record, changes) {
            for (field, value) in changes {
                if field != "id" {
                    target.insert(field.clone(), value.clone());
                }
            }
        }
        Ok(record.clone())
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), BackendError> {
        self.record_call("DELETE", kind, Some(id)).await;
        self.check_mutation().await?;

        let mut collections = self.collections.write().await;
        let records = collections
            .get_mut(&kind)
            .ok_or_else(|| not_found(kind, id))?;
        let before = records.len();
        records.retain(|r| !has_id(r, id));
        if records.len() == before {
            return Err(not_found(kind, id));
        }
        Ok(())
    }
}
