//! JWKS (JSON Web Key Set) handling
//!
//! Fetches provider key sets and resolves signing keys by `kid`.
//!
//! Each provider's key set is cached for the life of the process. A set
//! older than the configured TTL is refetched before use. A `kid` that is
//! missing from the cached set triggers at most one refresh, and only when
//! the set is older than the refresh cool-down, so a stream of made-up key
//! ids cannot turn into a stream of outbound fetches. Concurrent refreshes
//! of the same provider collapse into a single fetch. A failed fetch is
//! handed to everyone who queued behind it and is not retried until the
//! cool-down has passed.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::jwk::Jwk;
use jsonwebtoken::DecodingKey;
use moka::future::Cache;
use serde::Deserialize;
use tokio::sync::Mutex;

use super::provider::Provider;
use crate::config::Config;
use crate::error::{ApiError, Result};
use crate::platform::{with_timeout, Clock, HttpClient};

/// A verification key taken from a provider's key set
#[derive(Clone)]
pub struct SigningKey {
    pub decoding_key: DecodingKey,
    /// Algorithm the key is published for, when the JWK declares one
    pub algorithm: Option<String>,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// One provider's published keys, keyed by `kid`
pub struct SigningKeySet {
    keys: HashMap<String, SigningKey>,
    fetched_at: u64,
}

impl SigningKeySet {
    /// Build a key set from JWK entries, skipping entries that are unusable
    pub fn from_jwks(entries: Vec<serde_json::Value>, fetched_at: u64) -> Self {
        let mut keys = HashMap::new();

        for entry in entries {
            let jwk: Jwk = match serde_json::from_value(entry) {
                Ok(jwk) => jwk,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unparseable JWK");
                    continue;
                }
            };

            let Some(kid) = jwk.common.key_id.clone() else {
                tracing::warn!("skipping JWK without 'kid'");
                continue;
            };

            let decoding_key = match DecodingKey::from_jwk(&jwk) {
                Ok(key) => key,
                Err(e) => {
                    tracing::warn!(kid = %kid, error = %e, "skipping JWK that is not a usable public key");
                    continue;
                }
            };

            let algorithm = jwk.common.key_algorithm.map(|alg| format!("{:?}", alg));
            keys.insert(kid, SigningKey { decoding_key, algorithm });
        }

        Self { keys, fetched_at }
    }

    pub fn get(&self, kid: &str) -> Option<&SigningKey> {
        self.keys.get(kid)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn fetched_at(&self) -> u64 {
        self.fetched_at
    }

    fn age(&self, now_secs: u64) -> u64 {
        now_secs.saturating_sub(self.fetched_at)
    }
}

#[derive(Deserialize)]
struct RawKeySet {
    keys: Vec<serde_json::Value>,
}

/// Fetch JWKS from a URI
pub async fn fetch_jwks(jwks_uri: &str, http: &dyn HttpClient) -> Result<Vec<serde_json::Value>> {
    let response = http
        .get(
            jwks_uri,
            &[
                ("Accept", "application/json"),
                ("User-Agent", "fedlogin"),
            ],
        )
        .await
        .map_err(|e| match e {
            ApiError::UpstreamTimeout { .. } => e,
            other => ApiError::key_set_fetch_failed(format!("failed to fetch JWKS: {}", other)),
        })?;

    if response.status != 200 {
        return Err(ApiError::key_set_fetch_failed(format!(
            "failed to fetch JWKS: HTTP {}",
            response.status
        )));
    }

    let jwks: RawKeySet = response
        .json()
        .map_err(|e| ApiError::key_set_fetch_failed(format!("invalid JWKS: {}", e)))?;

    Ok(jwks.keys)
}

/// A refresh attempt that failed, kept for the cool-down window
struct FailedAttempt {
    at: u64,
    error: ApiError,
}

/// Refresh bookkeeping for one provider
///
/// Holding `last_failure` serializes refresh attempts. `generation` is
/// bumped each time an attempt settles, so a caller that queued behind an
/// attempt can tell it has already been made.
struct RefreshSlot {
    generation: AtomicU64,
    last_failure: Mutex<Option<FailedAttempt>>,
}

impl RefreshSlot {
    fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
            last_failure: Mutex::new(None),
        }
    }
}

/// Per-provider signing key cache
pub struct KeyResolver {
    http: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
    endpoints: HashMap<Provider, String>,
    sets: Cache<Provider, Arc<SigningKeySet>>,
    slots: HashMap<Provider, RefreshSlot>,
    ttl_secs: u64,
    refresh_cooldown_secs: u64,
    timeout: Duration,
}

impl KeyResolver {
    pub fn new(config: &Config, http: Arc<dyn HttpClient>, clock: Arc<dyn Clock>) -> Self {
        let endpoints = HashMap::from([
            (Provider::Google, config.google.jwks_uri.clone()),
            (Provider::Apple, config.apple.jwks_uri.clone()),
        ]);
        let slots = endpoints.keys().map(|p| (*p, RefreshSlot::new())).collect();

        Self {
            http,
            clock,
            sets: Cache::builder().initial_capacity(endpoints.len()).build(),
            endpoints,
            slots,
            ttl_secs: config.key_set_ttl.as_secs(),
            refresh_cooldown_secs: config.key_refresh_cooldown.as_secs(),
            timeout: config.upstream_timeout,
        }
    }

    /// Find the key a provider published under `kid`
    ///
    /// Returns `UnknownKey` when the key is still missing after the single
    /// permitted refresh. Fetch failures are reported as such, never as a
    /// missing key.
    #[tracing::instrument(skip(self))]
    pub async fn resolve(&self, provider: Provider, kid: &str) -> Result<SigningKey> {
        let slot = self.slot(provider)?;
        let observed = slot.generation.load(Ordering::Acquire);
        let now = self.clock.now_secs();
        let mut set = self.current(provider, slot).await?;

        if set.age(now) >= self.ttl_secs {
            tracing::debug!(age_secs = set.age(now), "key set past TTL, refreshing");
            set = self.refresh(provider, slot, observed).await?;
        }

        if let Some(key) = set.get(kid) {
            tracing::debug!("key set hit");
            return Ok(key.clone());
        }

        if set.age(now) < self.refresh_cooldown_secs {
            tracing::warn!(
                age_secs = set.age(now),
                "kid not in key set and refresh is cooling down"
            );
            return Err(ApiError::unknown_key(format!("no signing key with kid '{}'", kid)));
        }

        tracing::debug!("kid not in key set, refreshing once");
        let set = self.refresh(provider, slot, observed).await?;

        set.get(kid)
            .cloned()
            .ok_or_else(|| ApiError::unknown_key(format!("no signing key with kid '{}'", kid)))
    }

    fn slot(&self, provider: Provider) -> Result<&RefreshSlot> {
        self.slots
            .get(&provider)
            .ok_or_else(|| ApiError::internal(format!("no key-set endpoint for {}", provider)))
    }

    /// Cached key set, loading it on first use
    ///
    /// A failed first load is remembered for the cool-down window so that
    /// requests arriving during an outage do not each fetch again.
    async fn current(&self, provider: Provider, slot: &RefreshSlot) -> Result<Arc<SigningKeySet>> {
        if let Some(set) = self.sets.get(&provider).await {
            return Ok(set);
        }

        if let Some(error) = self.recent_failure(&*slot.last_failure.lock().await) {
            return Err(error);
        }

        match self.sets.try_get_with(provider, self.fetch(provider)).await {
            Ok(set) => Ok(set),
            Err(e) => {
                let error = (*e).clone();
                *slot.last_failure.lock().await = Some(FailedAttempt {
                    at: self.clock.now_secs(),
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    /// Replace the cached set with a freshly fetched one
    ///
    /// Callers queue on the provider's slot. A caller whose `observed`
    /// generation has moved on while it waited takes the outcome of the
    /// attempt that settled it, success or failure, instead of fetching.
    async fn refresh(&self, provider: Provider, slot: &RefreshSlot, observed: u64) -> Result<Arc<SigningKeySet>> {
        let mut last_failure = slot.last_failure.lock().await;

        if slot.generation.load(Ordering::Acquire) != observed {
            tracing::debug!("key set refresh settled by a concurrent request");
            if let Some(failure) = &*last_failure {
                return Err(failure.error.clone());
            }
            return self
                .sets
                .get(&provider)
                .await
                .ok_or_else(|| ApiError::internal(format!("key set for {} missing after refresh", provider)));
        }

        if let Some(error) = self.recent_failure(&last_failure) {
            tracing::debug!("last key set refresh failed recently, not retrying yet");
            return Err(error);
        }

        let attempted_at = self.clock.now_secs();
        let outcome = self.fetch(provider).await;
        match &outcome {
            Ok(fresh) => {
                self.sets.insert(provider, fresh.clone()).await;
                *last_failure = None;
            }
            Err(e) => {
                tracing::warn!(provider = %provider, error = %e, "key set refresh failed");
                *last_failure = Some(FailedAttempt {
                    at: attempted_at,
                    error: e.clone(),
                });
            }
        }
        slot.generation.fetch_add(1, Ordering::Release);
        outcome
    }

    fn recent_failure(&self, last_failure: &Option<FailedAttempt>) -> Option<ApiError> {
        let failure = last_failure.as_ref()?;
        let age = self.clock.now_secs().saturating_sub(failure.at);
        (age < self.refresh_cooldown_secs).then(|| failure.error.clone())
    }

    async fn fetch(&self, provider: Provider) -> Result<Arc<SigningKeySet>> {
        let uri = self
            .endpoints
            .get(&provider)
            .ok_or_else(|| ApiError::internal(format!("no key-set endpoint for {}", provider)))?;

        let entries = with_timeout(self.timeout, "key set fetch", fetch_jwks(uri, self.http.as_ref())).await?;
        let set = SigningKeySet::from_jwks(entries, self.clock.now_secs());

        if set.is_empty() {
            tracing::warn!(provider = %provider, "key set has no usable keys");
        } else {
            tracing::info!(provider = %provider, keys = set.len(), "fetched signing key set");
        }
        Ok(Arc::new(set))
    }
}
