//! Signing key cache backed by a published JWKS document.
//!
//! Keys are fetched lazily: the first lookup triggers a fetch, and a lookup
//! for an unknown key ID triggers a refetch (the identity provider may have
//! rotated its keys). Concurrent refreshes collapse into a single upstream
//! request, and a failed refresh keeps serving whatever was cached before.
//! Refreshes can be spaced out with a minimum interval so that tokens naming
//! made-up key IDs cannot drive one upstream fetch each.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::jwk::Jwk;
use jsonwebtoken::{Algorithm, DecodingKey};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::error::KeyError;

/// A public key usable for signature verification.
#[derive(Clone)]
pub struct SigningKey {
    /// The `kid` the key is published under
    pub key_id: String,
    /// Algorithm the key declares, if any
    pub algorithm: Option<Algorithm>,
    /// Verification key
    pub decoding_key: DecodingKey,
    /// When the key set containing this key was fetched
    pub fetched_at: DateTime<Utc>,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .field("fetched_at", &self.fetched_at)
            .finish_non_exhaustive()
    }
}

/// Something that can produce the current set of signing keys.
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Fetch the full key set.
    async fn fetch(&self) -> Result<Vec<SigningKey>, KeyError>;
}

/// Fetches keys from a JWKS endpoint over HTTP.
#[derive(Debug, Clone)]
pub struct JwksSource {
    http: reqwest::Client,
    url: String,
}

impl JwksSource {
    /// Create a source for the given JWKS URL.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, KeyError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| KeyError::Unavailable(e.to_string()))?;

        Ok(Self {
            http,
            url: url.into(),
        })
    }

    /// The endpoint this source reads from.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl KeySource for JwksSource {
    async fn fetch(&self) -> Result<Vec<SigningKey>, KeyError> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| KeyError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(KeyError::Unavailable(format!(
                "{} returned status {}",
                self.url,
                status.as_u16()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| KeyError::Unavailable(e.to_string()))?;

        let keys = parse_key_set(&body, Utc::now())?;
        info!(url = %self.url, key_count = keys.len(), "fetched signing keys");
        Ok(keys)
    }
}

/// Parse a JWKS document into verification keys.
///
/// The document must be an object with a `keys` array. Individual entries
/// without a `kid`, marked for a use other than `sig`, or not convertible to
/// a verification key are skipped.
pub fn parse_key_set(body: &str, fetched_at: DateTime<Utc>) -> Result<Vec<SigningKey>, KeyError> {
    let doc: Value = serde_json::from_str(body).map_err(|e| KeyError::Malformed(e.to_string()))?;

    let entries = doc
        .get("keys")
        .and_then(Value::as_array)
        .ok_or_else(|| KeyError::Malformed("missing keys array".to_string()))?;

    let keys = entries
        .iter()
        .filter_map(|entry| {
            let key_id = entry.get("kid")?.as_str()?.to_string();

            if let Some(key_use) = entry.get("use").and_then(Value::as_str) {
                if key_use != "sig" {
                    debug!(kid = %key_id, key_use, "skipping non-signing key");
                    return None;
                }
            }

            let algorithm = match entry.get("alg").and_then(Value::as_str) {
                Some(raw) => match Algorithm::from_str(raw) {
                    Ok(alg) => Some(alg),
                    Err(_) => {
                        debug!(kid = %key_id, alg = raw, "skipping key with unsupported algorithm");
                        return None;
                    }
                },
                None => None,
            };

            let jwk: Jwk = match serde_json::from_value(entry.clone()) {
                Ok(jwk) => jwk,
                Err(e) => {
                    debug!(kid = %key_id, error = %e, "skipping unparseable key");
                    return None;
                }
            };

            let decoding_key = match DecodingKey::from_jwk(&jwk) {
                Ok(key) => key,
                Err(e) => {
                    debug!(kid = %key_id, error = %e, "skipping unusable key");
                    return None;
                }
            };

            Some(SigningKey {
                key_id,
                algorithm,
                decoding_key,
                fetched_at,
            })
        })
        .collect();

    Ok(keys)
}

type KeySet = HashMap<String, Arc<SigningKey>>;

/// Outcome of the most recent refresh.
#[derive(Default)]
struct RefreshState {
    last_error: Option<KeyError>,
    last_attempt: Option<Instant>,
}

/// Thread-safe cache of signing keys indexed by key ID.
///
/// The cached set is replaced wholesale on every successful refresh, so a
/// reader never sees a half-updated set.
pub struct KeyCache {
    source: Arc<dyn KeySource>,
    keys: RwLock<Option<Arc<KeySet>>>,
    /// Serialises refreshes and remembers how the last one ended
    refresh: Mutex<RefreshState>,
    /// Completed refresh attempts, successful or not
    attempts: AtomicU64,
    min_refresh_interval: Duration,
}

impl KeyCache {
    /// Create an empty cache. Nothing is fetched until the first lookup.
    pub fn new(source: Arc<dyn KeySource>) -> Self {
        Self {
            source,
            keys: RwLock::new(None),
            refresh: Mutex::new(RefreshState::default()),
            attempts: AtomicU64::new(0),
            min_refresh_interval: Duration::ZERO,
        }
    }

    /// Refuse to refetch within `interval` of the previous attempt.
    ///
    /// A miss inside the interval is answered from the cache alone. With the
    /// default of zero every miss refetches.
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Look up a key by ID, refreshing the key set on a miss.
    ///
    /// When several lookups miss at once only one of them fetches; the rest
    /// wait for it and use its result. If the refresh fails but keys were
    /// cached earlier, the earlier keys keep being served and a miss is
    /// reported as [`KeyError::NotFound`]. With nothing cached a failed
    /// refresh is returned as is.
    pub async fn get_key(&self, kid: &str) -> Result<Arc<SigningKey>, KeyError> {
        let observed = self.attempts.load(Ordering::Acquire);

        if let Some(key) = self.lookup(kid).await {
            return Ok(key);
        }

        let outcome = {
            let mut state = self.refresh.lock().await;

            let recent = state
                .last_attempt
                .is_some_and(|at| at.elapsed() < self.min_refresh_interval);

            if self.attempts.load(Ordering::Acquire) == observed && !recent {
                let result = self.refresh_locked().await;
                state.last_error = result.as_ref().err().cloned();
                state.last_attempt = Some(Instant::now());
                self.attempts.fetch_add(1, Ordering::Release);
                result.map(|_| ())
            } else {
                if self.attempts.load(Ordering::Acquire) == observed {
                    debug!(kid, "key set refreshed recently, skipping refetch");
                }
                // Reuse the outcome of the latest refresh
                match state.last_error.as_ref() {
                    Some(err) => Err(err.clone()),
                    None => Ok(()),
                }
            }
        };

        match outcome {
            Ok(()) => self
                .lookup(kid)
                .await
                .ok_or_else(|| KeyError::NotFound(kid.to_string())),
            Err(err) => {
                if self.is_empty().await {
                    error!(error = %err, "no signing keys available");
                    return Err(err);
                }

                warn!(error = %err, kid, "key set refresh failed, serving cached keys");
                self.lookup(kid)
                    .await
                    .ok_or_else(|| KeyError::NotFound(kid.to_string()))
            }
        }
    }

    /// Force a refresh on the next lookup by discarding cached keys.
    pub async fn invalidate(&self) {
        self.refresh.lock().await.last_attempt = None;
        let mut guard = self.keys.write().await;
        *guard = None;
    }

    /// Number of cached keys.
    pub async fn len(&self) -> usize {
        let guard = self.keys.read().await;
        guard.as_ref().map_or(0, |set| set.len())
    }

    /// Check if no keys are cached.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn lookup(&self, kid: &str) -> Option<Arc<SigningKey>> {
        let guard = self.keys.read().await;
        guard.as_ref()?.get(kid).cloned()
    }

    /// Fetch and swap in a new key set. Must be called with the refresh lock held.
    async fn refresh_locked(&self) -> Result<usize, KeyError> {
        let fetched = self.source.fetch().await?;

        let set: KeySet = fetched
            .into_iter()
            .map(|key| (key.key_id.clone(), Arc::new(key)))
            .collect();
        let count = set.len();

        let mut guard = self.keys.write().await;
        *guard = Some(Arc::new(set));

        debug!(key_count = count, "key set refreshed");
        Ok(count)
    }
}

impl fmt::Debug for KeyCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyCache")
            .field("attempts", &self.attempts.load(Ordering::Relaxed))
            .field("min_refresh_interval", &self.min_refresh_interval)
            .finish_non_exhaustive()
    }
}
