//! Per-definition response cache.
//!
//! Each cached [`ApiDefinition`](crate::core::ApiDefinition) owns exactly one
//! [`CachePolicy`]: the expiration configuration plus the last transformed
//! response and the instant it stops being valid. The mutable part lives
//! behind an async read/write lock and is reachable only through
//! [`CachePolicy::peek`] and [`CachePolicy::refresh`].
//!
//! Readers of a valid entry share the lock. A refresh takes the exclusive
//! lock and re-validates before calling the backend, so concurrent callers
//! arriving on an expired entry trigger a single backend call and all observe
//! its result.
use std::future::Future;

use chrono::{DateTime, Local};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::core::expiry::{ExpiryFormat, ExpirySource};

#[derive(Debug, Default)]
struct CacheState {
    /// `None` until a backend response carried a discoverable expiration.
    expires: Option<DateTime<Local>>,
    response: Option<Value>,
}

impl CacheState {
    fn fresh(&self, now: DateTime<Local>) -> Option<&Value> {
        match (&self.expires, &self.response) {
            (Some(expires), Some(response)) if now <= *expires => Some(response),
            _ => None,
        }
    }
}

/// Output of a refresh: the response to store and, if one was found, when it
/// expires.
#[derive(Debug, Clone)]
pub struct Refreshed {
    pub response: Value,
    pub expires: Option<DateTime<Local>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CachePolicy {
    /// Where the expiration is read from.
    #[serde(default)]
    pub from: Option<ExpirySource>,
    #[serde(default)]
    pub format: Option<ExpiryFormat>,
    #[serde(skip)]
    state: RwLock<CacheState>,
}

impl CachePolicy {
    pub fn new(from: ExpirySource, format: ExpiryFormat) -> Self {
        Self {
            from: Some(from),
            format: Some(format),
            state: RwLock::new(CacheState::default()),
        }
    }

    /// The cached response if it is still valid.
    pub async fn peek(&self) -> Option<Value> {
        let state = self.state.read().await;
        state.fresh(Local::now()).cloned()
    }

    /// Current expiration instant, if one was ever learned.
    pub async fn expires_at(&self) -> Option<DateTime<Local>> {
        self.state.read().await.expires
    }

    /// Return the cached response, or run `produce` to replace it.
    ///
    /// Validity is checked under the shared lock and again under the exclusive
    /// lock; `produce` runs only when both checks miss, with the exclusive lock
    /// held. Its response is stored unconditionally, its expiration only when
    /// present. A failed `produce` leaves the state untouched.
    pub async fn refresh<F, Fut, E>(&self, produce: F) -> Result<Value, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Refreshed, E>>,
    {
        {
            let state = self.state.read().await;
            if let Some(response) = state.fresh(Local::now()) {
                tracing::debug!("Cache was refreshed by another caller");
                return Ok(response.clone());
            }
        }

        let mut state = self.state.write().await;
        if let Some(response) = state.fresh(Local::now()) {
            tracing::debug!("Cache was refreshed while waiting for the exclusive lock");
            return Ok(response.clone());
        }

        let refreshed = produce().await?;
        state.response = Some(refreshed.response.clone());
        match refreshed.expires {
            Some(expires) => {
                tracing::info!("Cache updated, expires at {}", expires);
                state.expires = Some(expires);
            }
            None => tracing::warn!("No expiration found in backend response, cache not updated"),
        }
        Ok(refreshed.response)
    }
}
