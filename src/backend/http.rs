//! HTTP backend implementation
//!
//! Implements `Backend` against the dashboard's JSON REST API:
//! - `GET /<collection>` → `{ "data": [...] }`
//! - `GET|PUT|DELETE /<collection>/:id`, `POST /<collection>` → `{ "data": {...} }`
//!
//! Session headers (`Authorization`, `X-User-Id`, `X-Country`) are read from
//! the `SessionProvider` on every request.

use super::session::SessionProvider;
use super::traits::{Backend, BackendError};
use crate::models::EntityKind;
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// REST client for the entity collections.
///
/// Cheaply cloneable (shares the reqwest client internally).
#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    session: Arc<dyn SessionProvider>,
}

/// Error bodies come as `{ "error": "..." }` or `{ "message": "..." }`
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

impl HttpBackend {
    /// Create a client for `base_url` (e.g. `http://localhost:3000/api`).
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        session: Arc<dyn SessionProvider>,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, kind: EntityKind, id: Option<&str>) -> String {
        match id {
            Some(id) => format!(
                "{}/{}/{}",
                self.base_url,
                kind.collection(),
                urlencoding::encode(id)
            ),
            None => format!("{}/{}", self.base_url, kind.collection()),
        }
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let credentials = self.session.credentials();
        let mut req = self.client.request(method, url);
        if let Some(token) = credentials.token {
            req = req.bearer_auth(token);
        }
        if let Some(user_id) = credentials.user_id {
            req = req.header("X-User-Id", user_id);
        }
        if let Some(country) = credentials.country {
            req = req.header("X-Country", country);
        }
        req
    }

    /// Send a request and check the status. A 404 on an item path maps to
    /// [`BackendError::NotFound`].
    async fn send(
        &self,
        method: Method,
        kind: EntityKind,
        id: Option<&str>,
        body: Option<&Value>,
    ) -> Result<Response, BackendError> {
        let url = self.url(kind, id);
        let mut req = self.request(method.clone(), &url);
        if let Some(body) = body {
            req = req.json(body);
        }

        let started = Instant::now();
        let response = req
            .send()
            .await
            .map_err(|e| BackendError::Network(format!("{method} {url}: {e}")))?;
        let status = response.status();
        debug!(
            method = %method,
            url = %url,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Backend request finished"
        );

        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            if let Some(id) = id {
                return Err(BackendError::NotFound {
                    kind,
                    id: id.to_string(),
                });
            }
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .ok()
            .and_then(|body| body.error.or(body.message))
            .unwrap_or(text);
        Err(BackendError::Status {
            status: status.as_u16(),
            message,
        })
    }

    /// Parse the body and unwrap the `data` envelope
    async fn data(response: Response) -> Result<Value, BackendError> {
        let body: Value = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        Ok(match body {
            Value::Object(mut map) if map.contains_key("data") => {
                map.remove("data").unwrap_or(Value::Null)
            }
            other => other,
        })
    }

    async fn record(response: Response) -> Result<Value, BackendError> {
        match Self::data(response).await? {
            record @ Value::Object(_) => Ok(record),
            other => Err(BackendError::Decode(format!("expected a record, got {other}"))),
        }
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn list(&self, kind: EntityKind) -> Result<Vec<Value>, BackendError> {
        let response = self.send(Method::GET, kind, None, None).await?;
        match Self::data(response).await? {
            Value::Array(records) => Ok(records),
            Value::Null => Ok(Vec::new()),
            other => Err(BackendError::Decode(format!(
                "expected a list of {}, got {other}",
                kind.collection()
            ))),
        }
    }

    async fn get(&self, kind: EntityKind, id: &str) -> Result<Value, BackendError> {
        let response = self.send(Method::GET, kind, Some(id), None).await?;
        Self::record(response).await
    }

    async fn create(&self, kind: EntityKind, record: &Value) -> Result<Value, BackendError> {
        let response = self.send(Method::POST, kind, None, Some(record)).await?;
        Self::record(response).await
    }

    async fn update(
        &self,
        kind: EntityKind,
        id: &str,
        changes: &Value,
    ) -> Result<Value, BackendError> {
        let response = self.send(Method::PUT, kind, Some(id), Some(changes)).await?;
        Self::record(response).await
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), BackendError> {
        self.send(Method::DELETE, kind, Some(id), None).await?;
        Ok(())
    }
}
