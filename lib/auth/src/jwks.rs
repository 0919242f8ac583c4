//! Apple's public signing keys.
//!
//! [`JwksCache`] keeps the last fetched key set as an immutable snapshot.
//! Lookups take a read lock only long enough to clone an `Arc`; a refresh
//! fetches with no lock held and swaps the new snapshot in. Concurrent
//! refreshes are collapsed into one request.
//!
//! A successful refresh replaces the whole set, so a key Apple has removed
//! is never served again. When a refresh fails, the previous snapshot is
//! still used for keys it contains, up to `max_stale` after it was fetched.

use crate::error::AuthError;
use async_trait::async_trait;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use rootcause::prelude::Report;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, instrument, warn};

/// Default lifetime of a fetched key set.
pub const DEFAULT_JWKS_TTL: Duration = Duration::from_secs(60 * 60);

/// Minimum gap between refreshes triggered by an unknown `kid`.
pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// How long a key set may be used after it was fetched if refreshes fail.
pub const DEFAULT_MAX_STALE: Duration = Duration::from_secs(24 * 60 * 60);

/// Resolves signing keys by key id.
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Returns the key for `kid`.
    ///
    /// # Errors
    ///
    /// Returns an invalid identity token error if the key is unknown or the
    /// key set cannot be obtained.
    async fn key(&self, kid: &str) -> Result<Jwk, Report<AuthError>>;
}

/// A fixed key set.
#[derive(Debug, Clone)]
pub struct StaticKeys(JwkSet);

impl StaticKeys {
    #[must_use]
    pub fn new(keys: JwkSet) -> Self {
        Self(keys)
    }

    /// Parses a JWKS document.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the document is not a valid JWKS.
    pub fn from_json(json: &str) -> Result<Self, Report<AuthError>> {
        let keys: JwkSet = serde_json::from_str(json)
            .map_err(|e| AuthError::configuration(format!("invalid JWKS document: {e}")))?;
        Ok(Self(keys))
    }
}

#[async_trait]
impl KeySource for StaticKeys {
    async fn key(&self, kid: &str) -> Result<Jwk, Report<AuthError>> {
        self.0
            .find(kid)
            .cloned()
            .ok_or_else(|| unknown_kid(kid).into())
    }
}

fn unknown_kid(kid: &str) -> AuthError {
    AuthError::invalid_identity_token(format!("no signing key with kid '{kid}'"))
}

#[derive(Debug)]
struct Snapshot {
    keys: JwkSet,
    fetched_at: Instant,
}

impl Snapshot {
    fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }
}

/// Key set fetched over HTTP and cached.
#[derive(Debug)]
pub struct JwksCache {
    http: reqwest::Client,
    url: String,
    ttl: Duration,
    min_refresh_interval: Duration,
    max_stale: Duration,
    current: RwLock<Option<Arc<Snapshot>>>,
    refresh_lock: Mutex<()>,
}

impl JwksCache {
    /// Creates an empty cache for the key set at `url`.
    #[must_use]
    pub fn new(url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            http,
            url: url.into(),
            ttl: DEFAULT_JWKS_TTL,
            min_refresh_interval: DEFAULT_MIN_REFRESH_INTERVAL,
            max_stale: DEFAULT_MAX_STALE,
            current: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    #[must_use]
    pub fn with_max_stale(mut self, max_stale: Duration) -> Self {
        self.max_stale = max_stale;
        self
    }

    async fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.current.read().await.clone()
    }

    /// Fetches a new key set unless another task already replaced `seen`
    /// while this one waited for the refresh lock.
    async fn refresh(&self, seen: Option<&Arc<Snapshot>>) -> Result<Arc<Snapshot>, Report<AuthError>> {
        let _guard = self.refresh_lock.lock().await;

        if let Some(current) = self.snapshot().await {
            let replaced = match seen {
                Some(seen) => !Arc::ptr_eq(seen, &current),
                None => true,
            };
            if replaced {
                return Ok(current);
            }
        }

        let keys = self.fetch().await?;
        let snapshot = Arc::new(Snapshot {
            keys,
            fetched_at: Instant::now(),
        });
        *self.current.write().await = Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    #[instrument(skip(self), fields(url = %self.url))]
    async fn fetch(&self) -> Result<JwkSet, Report<AuthError>> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| {
                AuthError::invalid_identity_token(format!("failed to fetch signing keys: {e}"))
            })?;

        let keys: JwkSet = response.json().await.map_err(|e| {
            AuthError::invalid_identity_token(format!("failed to parse signing keys: {e}"))
        })?;

        debug!(keys = keys.keys.len(), "refreshed signing keys");
        Ok(keys)
    }
}

#[async_trait]
impl KeySource for JwksCache {
    async fn key(&self, kid: &str) -> Result<Jwk, Report<AuthError>> {
        let cached = self.snapshot().await;

        if let Some(snapshot) = &cached {
            let age = snapshot.age();
            if age < self.ttl {
                if let Some(key) = snapshot.keys.find(kid) {
                    return Ok(key.clone());
                }
                if age < self.min_refresh_interval {
                    return Err(unknown_kid(kid).into());
                }
            }
        }

        match self.refresh(cached.as_ref()).await {
            Ok(snapshot) => snapshot
                .keys
                .find(kid)
                .cloned()
                .ok_or_else(|| unknown_kid(kid).into()),
            Err(report) => {
                let stale = cached
                    .as_ref()
                    .filter(|snapshot| snapshot.age() <= self.max_stale)
                    .and_then(|snapshot| snapshot.keys.find(kid));
                match stale {
                    Some(key) => {
                        warn!(kid, error = %report, "key refresh failed, using cached key");
                        Ok(key.clone())
                    }
                    None => Err(report),
                }
            }
        }
    }
}
