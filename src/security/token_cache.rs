use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::PublishError;
use crate::security::credentials::CredentialSpec;
use crate::security::B64_URL_FORGIVING;

/// A bearer token from a successful token-endpoint exchange, with its
/// effective expiry already computed.
#[derive(Debug, Clone)]
pub struct CachedToken {
    pub value: String,
    pub subjects: HashSet<String>,
    pub expires_at: DateTime<Utc>,
}

impl CachedToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Raw result of a token-endpoint exchange, before expiry computation.
#[derive(Debug, Clone)]
pub struct FetchedToken {
    pub access_token: String,
    /// Server-declared lifetime (`expires_in`), if any.
    pub expires_in: Option<std::time::Duration>,
}

/// Injected token-endpoint exchange. The cache never talks to the network
/// itself.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn exchange(&self, spec: &CredentialSpec) -> Result<FetchedToken, PublishError>;
}

struct Slot {
    guard: Arc<Mutex<Option<CachedToken>>>,
    last_used: Instant,
}

/// Expiry-aware token cache keyed by credential fingerprint.
///
/// Concurrency is coordinated with one async mutex per fingerprint: the
/// first caller through the slot performs the exchange while every
/// concurrent caller for the same fingerprint awaits the slot and then
/// reads the freshly cached token, so at most one exchange is in flight
/// per fingerprint. Callers for other fingerprints are never blocked.
pub struct TokenCache {
    exchange: Arc<dyn TokenExchange>,
    clock_skew: ChronoDuration,
    max_entries: usize,
    slots: Mutex<HashMap<String, Slot>>,
}

pub const DEFAULT_MAX_ENTRIES: usize = 64;
pub const DEFAULT_CLOCK_SKEW_SECS: i64 = 60;

impl TokenCache {
    pub fn new(exchange: Arc<dyn TokenExchange>) -> Self {
        Self::with_limits(
            exchange,
            ChronoDuration::seconds(DEFAULT_CLOCK_SKEW_SECS),
            DEFAULT_MAX_ENTRIES,
        )
    }

    pub fn with_limits(
        exchange: Arc<dyn TokenExchange>,
        clock_skew: ChronoDuration,
        max_entries: usize,
    ) -> Self {
        Self {
            exchange,
            clock_skew,
            max_entries: max_entries.max(1),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Get a non-expired token for `spec`, fetching one if necessary.
    pub async fn get(&self, spec: &CredentialSpec) -> Result<CachedToken, PublishError> {
        let fingerprint = spec.fingerprint();
        let guard = self.slot(&fingerprint).await;
        let mut cached = guard.lock().await;

        let now = Utc::now();
        if let Some(token) = cached.as_ref() {
            if !token.is_expired_at(now) {
                return Ok(token.clone());
            }
            debug!(fingerprint = %fingerprint, "cached token expired, refetching");
            *cached = None;
        }

        let fetched = self.exchange.exchange(spec).await?;
        let token = build_token(fetched, now, self.clock_skew)?;

        if token.is_expired_at(now) {
            // Effective TTL was consumed by the clock-skew margin. Serve the
            // token once but never cache it.
            warn!(fingerprint = %fingerprint, "token lifetime within clock-skew margin, not caching");
        } else {
            *cached = Some(token.clone());
        }
        Ok(token)
    }

    /// Drop any cached token for `spec`, e.g. after the remote endpoint
    /// rejected a request signed with it. The next `get` refetches.
    pub async fn invalidate(&self, spec: &CredentialSpec) {
        let fingerprint = spec.fingerprint();
        if self.slots.lock().await.remove(&fingerprint).is_some() {
            debug!(fingerprint = %fingerprint, "cached token invalidated");
        }
    }

    /// Number of fingerprints currently tracked.
    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.lock().await.is_empty()
    }

    /// Fetch or create the per-fingerprint slot, updating recency and
    /// evicting the least recently used slot past `max_entries`.
    async fn slot(&self, fingerprint: &str) -> Arc<Mutex<Option<CachedToken>>> {
        let mut slots = self.slots.lock().await;

        if !slots.contains_key(fingerprint) && slots.len() >= self.max_entries {
            if let Some(oldest) = slots
                .iter()
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(key, _)| key.clone())
            {
                debug!(evicted = %oldest, "token cache full, evicting least recently used entry");
                slots.remove(&oldest);
            }
        }

        let slot = slots.entry(fingerprint.to_owned()).or_insert_with(|| Slot {
            guard: Arc::new(Mutex::new(None)),
            last_used: Instant::now(),
        });
        slot.last_used = Instant::now();
        slot.guard.clone()
    }
}

/// Compute the effective expiry for a fetched token:
/// `min(server-declared expires_in, embedded exp claim) - clock skew`.
fn build_token(
    fetched: FetchedToken,
    now: DateTime<Utc>,
    clock_skew: ChronoDuration,
) -> Result<CachedToken, PublishError> {
    let claims = parse_claims(&fetched.access_token)?;

    let declared = fetched
        .expires_in
        .and_then(|d| ChronoDuration::from_std(d).ok())
        .map(|d| now + d);
    let expires_at = match (declared, claims.expires_at) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) => a,
        (None, Some(b)) => b,
        // No expiry information at all: zero TTL, refetched every call.
        (None, None) => now,
    };

    Ok(CachedToken {
        value: fetched.access_token,
        subjects: claims.subjects,
        expires_at: expires_at - clock_skew,
    })
}

struct TokenClaims {
    expires_at: Option<DateTime<Utc>>,
    subjects: HashSet<String>,
}

/// Structural validation of the token: three dot-separated segments with a
/// base64url JSON object payload. Anything else is `TokenInvalid`.
fn parse_claims(token: &str) -> Result<TokenClaims, PublishError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(PublishError::TokenInvalid {
            reason: format!("expected 3 token segments, got {}", segments.len()),
        });
    }

    let payload = B64_URL_FORGIVING
        .decode(segments[1])
        .map_err(|e| PublishError::TokenInvalid {
            reason: format!("token payload is not base64url: {e}"),
        })?;
    let claims: serde_json::Value =
        serde_json::from_slice(&payload).map_err(|e| PublishError::TokenInvalid {
            reason: format!("token payload is not JSON: {e}"),
        })?;
    if !claims.is_object() {
        return Err(PublishError::TokenInvalid {
            reason: "token payload is not a JSON object".into(),
        });
    }

    let expires_at = claims
        .get("exp")
        .and_then(|v| v.as_i64())
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single());
    let subjects = claims
        .get("sub")
        .and_then(|v| v.as_str())
        .map(|s| HashSet::from([s.to_owned()]))
        .unwrap_or_default();

    Ok(TokenClaims {
        expires_at,
        subjects,
    })
}
