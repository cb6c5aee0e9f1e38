//! C1: KeySet Cache.
//!
//! Maintains one published, immutable snapshot of the identity provider's
//! signing keys behind a single-writer refresh path (design doc §4.1). Reads
//! are lock-free (`ArcSwap::load`); refreshes are serialized through a tokio
//! mutex so concurrent misses coalesce onto one winner — the loser simply
//! re-checks the (now fresh) snapshot after acquiring the lock instead of
//! doing a second fetch, which is the "singleflight" property design doc
//! §4.1 asks for.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, SystemTime},
};

use arc_swap::ArcSwapOption;
use jsonwebtoken::DecodingKey;
use sshca_core::error::IssueError;

/// Floor/ceiling on how long a fetched snapshot stays valid, regardless of
/// what the provider's cache headers claim. Design doc §4.1.
const MIN_SNAPSHOT_TTL: Duration = Duration::from_secs(10 * 60);
const MAX_SNAPSHOT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Used when the provider response carries no usable cache directive.
const DEFAULT_SNAPSHOT_TTL: Duration = Duration::from_secs(60 * 60);

/// One signing key published by the identity provider.
#[derive(Clone)]
pub struct ProviderKey {
    pub kid: String,
    pub alg: jsonwebtoken::Algorithm,
    pub decoding_key: DecodingKey,
}

/// An immutable, point-in-time view of the provider's keyset.
struct KeySetSnapshot {
    keys: HashMap<String, ProviderKey>,
    expires_at: SystemTime,
}

impl KeySetSnapshot {
    fn is_expired(&self, now: SystemTime) -> bool {
        now >= self.expires_at
    }
}

pub struct KeySetCache {
    jwks_url: String,
    http: reqwest::Client,
    snapshot: ArcSwapOption<KeySetSnapshot>,
    // Serializes refreshes so concurrent cache misses coalesce onto one
    // winner instead of each firing their own HTTP request.
    refresh_lock: tokio::sync::Mutex<()>,
}

impl KeySetCache {
    pub fn new(jwks_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            jwks_url: jwks_url.into(),
            http,
            snapshot: ArcSwapOption::from(None),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Builds a cache pre-populated with a fixed snapshot, bypassing the
    /// network entirely. Used by tests that need to exercise the verifier
    /// without a live identity provider.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn for_test(keys: HashMap<String, ProviderKey>) -> Self {
        Self {
            jwks_url: String::new(),
            http: reqwest::Client::new(),
            snapshot: ArcSwapOption::from(Some(Arc::new(KeySetSnapshot {
                keys,
                expires_at: SystemTime::now() + MAX_SNAPSHOT_TTL,
            }))),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// `Lookup(kid) → ProviderKey | NotFound`, design doc §4.1.
    ///
    /// Hot reads never touch the network. On a miss or an expired snapshot,
    /// this triggers (at most) one refresh and retries once.
    pub async fn lookup(&self, kid: &str) -> Result<ProviderKey, IssueError> {
        if let Some(key) = self.try_lookup_fresh(kid) {
            return Ok(key);
        }

        self.refresh(kid).await?;

        self.try_lookup_fresh(kid)
            .ok_or_else(|| IssueError::unknown_key_id(kid))
    }

    /// Returns `Some` only if we have a non-expired snapshot containing
    /// `kid`. Never triggers I/O.
    fn try_lookup_fresh(&self, kid: &str) -> Option<ProviderKey> {
        let guard = self.snapshot.load();
        let snapshot = guard.as_deref()?;
        if snapshot.is_expired(SystemTime::now()) {
            return None;
        }
        snapshot.keys.get(kid).cloned()
    }

    /// Forces a refresh unless another caller already refreshed `kid` into
    /// the snapshot while we were waiting for the lock. Keying the
    /// double-check off `kid`'s presence (rather than off expiry alone)
    /// matters because a rotated-in kid is a cache miss against a snapshot
    /// that is still well within its TTL — expiry alone would never trigger
    /// a fetch for it until the whole snapshot aged out.
    async fn refresh(&self, kid: &str) -> Result<(), IssueError> {
        let _guard = self.refresh_lock.lock().await;

        // Someone else may have just refreshed while we waited for the lock.
        let now = SystemTime::now();
        if let Some(snapshot) = self.snapshot.load().as_deref() {
            if !snapshot.is_expired(now) && snapshot.keys.contains_key(kid) {
                return Ok(());
            }
        }

        let resp = self
            .http
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| IssueError::keyset_unavailable(format!("fetching jwks: {e}")))?;

        let expires_at = now + cache_ttl_from_headers(resp.headers());

        let resp = resp
            .error_for_status()
            .map_err(|e| IssueError::keyset_unavailable(format!("jwks endpoint returned an error: {e}")))?;

        let jwks: JwkSet = resp
            .json()
            .await
            .map_err(|e| IssueError::keyset_unavailable(format!("malformed jwks response: {e}")))?;

        let keys = build_decoding_keys(jwks)?;
        self.snapshot.store(Some(Arc::new(KeySetSnapshot { keys, expires_at })));

        Ok(())
    }
}

/// Minimal JWK Set shape — just enough to build `DecodingKey`s. We only
/// support RSA keys, matching design doc §4.2's approved algorithm family.
#[derive(serde::Deserialize)]
struct JwkSet {
    keys: Vec<Jwk>,
}

#[derive(serde::Deserialize)]
struct Jwk {
    kid: String,
    #[serde(default)]
    alg: Option<String>,
    kty: String,
    n: Option<String>,
    e: Option<String>,
}

fn build_decoding_keys(jwks: JwkSet) -> Result<HashMap<String, ProviderKey>, IssueError> {
    let mut keys = HashMap::with_capacity(jwks.keys.len());
    for jwk in jwks.keys {
        if jwk.kty != "RSA" {
            // Non-RSA keys are silently skipped rather than erroring the
            // whole refresh: a provider publishing e.g. an EC signing key
            // we don't support yet shouldn't take down lookups for kids we
            // do support.
            tracing::warn!(kid = %jwk.kid, kty = %jwk.kty, "skipping unsupported key type in jwks");
            continue;
        }
        let (n, e) = match (jwk.n, jwk.e) {
            (Some(n), Some(e)) => (n, e),
            _ => {
                tracing::warn!(kid = %jwk.kid, "rsa jwk missing n/e components");
                continue;
            }
        };
        let decoding_key = DecodingKey::from_rsa_components(&n, &e)
            .map_err(|e| IssueError::keyset_unavailable(format!("malformed rsa jwk: {e}")))?;
        let alg = match jwk.alg.as_deref() {
            Some("RS256") | None => jsonwebtoken::Algorithm::RS256,
            Some("RS384") => jsonwebtoken::Algorithm::RS384,
            Some("RS512") => jsonwebtoken::Algorithm::RS512,
            Some(other) => {
                tracing::warn!(kid = %jwk.kid, alg = %other, "skipping jwk with unapproved algorithm");
                continue;
            }
        };
        keys.insert(jwk.kid.clone(), ProviderKey { kid: jwk.kid, alg, decoding_key });
    }
    Ok(keys)
}

fn cache_ttl_from_headers(headers: &http::HeaderMap) -> Duration {
    let max_age = headers
        .get(http::header::CACHE_CONTROL)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_max_age);

    let ttl = max_age.unwrap_or(DEFAULT_SNAPSHOT_TTL);
    ttl.clamp(MIN_SNAPSHOT_TTL, MAX_SNAPSHOT_TTL)
}

fn parse_max_age(cache_control: &str) -> Option<Duration> {
    cache_control.split(',').find_map(|directive| {
        let directive = directive.trim();
        let secs = directive.strip_prefix("max-age=")?;
        secs.parse::<u64>().ok().map(Duration::from_secs)
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use sshca_core::error::IssueErrorKind;

    #[test]
    fn max_age_parses_and_clamps_to_floor() {
        let ttl = cache_ttl_from_headers(&{
            let mut h = http::HeaderMap::new();
            h.insert(http::header::CACHE_CONTROL, "public, max-age=5".parse().unwrap());
            h
        });
        assert_eq!(ttl, MIN_SNAPSHOT_TTL);
    }

    #[test]
    fn max_age_clamps_to_ceiling() {
        let ttl = cache_ttl_from_headers(&{
            let mut h = http::HeaderMap::new();
            h.insert(http::header::CACHE_CONTROL, "max-age=999999999".parse().unwrap());
            h
        });
        assert_eq!(ttl, MAX_SNAPSHOT_TTL);
    }

    #[test]
    fn missing_header_uses_default() {
        let ttl = cache_ttl_from_headers(&http::HeaderMap::new());
        assert_eq!(ttl, DEFAULT_SNAPSHOT_TTL);
    }

    #[tokio::test]
    async fn lookup_on_empty_cache_without_network_access_reports_unavailable() {
        // jwks_url points nowhere reachable; this just exercises the "no
        // snapshot yet" -> refresh -> failure path without a live server.
        let cache = KeySetCache::new("http://127.0.0.1:1/jwks.json", reqwest::Client::new());
        let err = cache.lookup("some-kid").await.unwrap_err();
        assert_eq!(err.kind, IssueErrorKind::KeySetUnavailable);
    }

    #[tokio::test]
    async fn unknown_kid_forces_a_fetch_even_when_the_snapshot_is_unexpired() {
        // `for_test` publishes a snapshot good for MAX_SNAPSHOT_TTL, with no
        // keys in it. A rotated-in kid is a miss against that still-fresh
        // snapshot; the fix is that `refresh` must not short-circuit on
        // `!is_expired` alone, so this must actually attempt the (here,
        // unreachable) network fetch and surface `KeySetUnavailable` rather
        // than skip straight to `UnknownKeyID` without ever trying.
        let cache = KeySetCache::for_test(HashMap::new());
        let err = cache.lookup("rotated-in-kid").await.unwrap_err();
        assert_eq!(err.kind, IssueErrorKind::KeySetUnavailable);
    }

    #[tokio::test]
    async fn refresh_is_skipped_when_the_kid_is_already_present() {
        let mut keys = HashMap::new();
        keys.insert(
            "known-kid".to_string(),
            ProviderKey {
                kid: "known-kid".to_string(),
                alg: jsonwebtoken::Algorithm::RS256,
                decoding_key: DecodingKey::from_rsa_components(
                    "2jjGx-FoiboxbzcAV0EbZO58tHUmItuG1WT7zs9bYeGllidPyEVypsRszE1_OALgb7gCNbCMB9pvw231bFCCmfyvZJ6LqjMxGokU1Kafw5AfXzFf2blGmE2s89m4haSb8xBS37yc4UVmDK6hIW80EiwPuItWsAwlxFLQpxv4Kp-vZfaijV-7z6Gn2vgpsqvlv84_HfGjBOTI_l4CnkjY4Me5TxScn6hJG9zzGhffkdGEk-CKBkQclNkbQFVCfUwpQeYxf5KXHiUwiqdY1azDz_8HdjJN9J3JDF5GckTbiqbsGEzwm98XduuKnXPJkwp-WFY1xmfaq_xeZkxVxEazYQ",
                    "AQAB",
                )
                .unwrap(),
            },
        );
        // jwks_url is unreachable; if `lookup` tried to refresh anyway this
        // would fail with `KeySetUnavailable` instead of returning the key.
        let cache = KeySetCache::for_test(keys);
        let key = cache.lookup("known-kid").await.unwrap();
        assert_eq!(key.kid, "known-kid");
    }
}
