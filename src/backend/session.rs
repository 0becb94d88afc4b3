//! Session credentials attached to every backend request

use std::sync::{PoisonError, RwLock};

/// Opaque, read-only session data
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub token: Option<String>,
    pub user_id: Option<String>,
    pub country: Option<String>,
}

/// Source of the current session. Read once per request, never cached.
pub trait SessionProvider: Send + Sync {
    fn credentials(&self) -> Credentials;
}

/// No credentials at all
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousSession;

impl SessionProvider for AnonymousSession {
    fn credentials(&self) -> Credentials {
        Credentials::default()
    }
}

/// Credentials held in memory, replaceable on login and clearable on logout
#[derive(Debug, Default)]
pub struct StaticSession {
    inner: RwLock<Credentials>,
}

impl StaticSession {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            inner: RwLock::new(credentials),
        }
    }

    /// Read `WORKSITE_TOKEN`, `WORKSITE_USER_ID` and `WORKSITE_COUNTRY`.
    /// Empty values count as absent.
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self::new(Credentials {
            token: var("WORKSITE_TOKEN"),
            user_id: var("WORKSITE_USER_ID"),
            country: var("WORKSITE_COUNTRY"),
        })
    }

    pub fn replace(&self, credentials: Credentials) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = credentials;
    }

    pub fn clear(&self) {
        self.replace(Credentials::default());
    }
}

impl SessionProvider for StaticSession {
    fn credentials(&self) -> Credentials {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
