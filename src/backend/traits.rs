//! Backend trait definition
//!
//! Defines the abstract interface to the REST API the dashboard talks to.
//! Async trait + Send + Sync so it can be shared as `Arc<dyn Backend>`.

use crate::models::EntityKind;
use async_trait::async_trait;
use serde_json::Value;

/// Transport-level failure of a backend call
///
/// Clone so that de-duplicated reads can hand the same error to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("network error: {0}")]
    Network(String),

    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid response body: {0}")]
    Decode(String),

    #[error("{kind} '{id}' not found")]
    NotFound { kind: EntityKind, id: String },
}

impl BackendError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound { .. })
    }
}

/// Abstract interface for reading and writing entity collections.
///
/// # Implementations
///
/// - [`HttpBackend`](super::HttpBackend): JSON REST client
/// - [`MockBackend`](super::MockBackend): in-memory backend for tests
#[async_trait]
pub trait Backend: Send + Sync {
    /// `GET /<collection>`
    async fn list(&self, kind: EntityKind) -> Result<Vec<Value>, BackendError>;

    /// `GET /<collection>/:id`
    async fn get(&self, kind: EntityKind, id: &str) -> Result<Value, BackendError>;

    /// `POST /<collection>`, returning the authoritative record with its real id
    async fn create(&self, kind: EntityKind, record: &Value) -> Result<Value, BackendError>;

    /// `PUT /<collection>/:id`, returning the authoritative record
    async fn update(&self, kind: EntityKind, id: &str, changes: &Value)
        -> Result<Value, BackendError>;

    /// `DELETE /<collection>/:id`
    async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), BackendError>;
}
