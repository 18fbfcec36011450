//! Signing-key resolution against a remote JWKS endpoint.
//!
//! Keys are fetched lazily, cached by `kid`, and refetched once the cache
//! entry outlives its TTL. Concurrent refreshes of the same key are
//! tolerated; the last write wins.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::DecodingKey;
use tracing::{debug, info};

use crate::error::AuthError;

/// How long a fetched signing key stays fresh before a refetch.
pub const KEY_CACHE_TTL: Duration = Duration::from_secs(600);

/// Well-known JWKS document path, relative to the auth service base URL.
const JWKS_PATH: &str = "/auth/v1/.well-known/jwks.json";

struct CachedKey {
    key: DecodingKey,
    fetched_at: Instant,
}

/// Fetches and caches public signing keys from a remote auth service.
pub struct JwksClient {
    jwks_url: String,
    client: reqwest::Client,
    cache: DashMap<String, CachedKey>,
    ttl: Duration,
}

impl JwksClient {
    /// Build a resolver for the auth service at `base_url`.
    pub fn new(base_url: &str) -> Result<Self, AuthError> {
        Self::with_ttl(base_url, KEY_CACHE_TTL)
    }

    /// Same as [`JwksClient::new`] with an explicit cache TTL.
    pub fn with_ttl(base_url: &str, ttl: Duration) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AuthError::ClientBuild {
                reason: e.to_string(),
            })?;

        Ok(Self {
            jwks_url: format!("{}{}", base_url.trim_end_matches('/'), JWKS_PATH),
            client,
            cache: DashMap::new(),
            ttl,
        })
    }

    /// Resolve the decoding key for `kid`, fetching the key set if the
    /// cached entry is missing or stale.
    pub async fn resolve(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        if let Some(entry) = self.cache.get(kid) {
            if entry.fetched_at.elapsed() < self.ttl {
                return Ok(entry.key.clone());
            }
        }
        self.fetch_key(kid).await
    }

    async fn fetch_key(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        debug!(url = %self.jwks_url, kid, "fetching JWKS document");

        let resp = self
            .client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| AuthError::KeyResolution {
                reason: format!("JWKS request failed: {e}"),
            })?;

        if !resp.status().is_success() {
            return Err(AuthError::KeyResolution {
                reason: format!("JWKS endpoint returned {}", resp.status()),
            });
        }

        let jwks: JwkSet = resp.json().await.map_err(|e| AuthError::KeyResolution {
            reason: format!("invalid JWKS document: {e}"),
        })?;

        let jwk = jwks.find(kid).ok_or_else(|| AuthError::KeyResolution {
            reason: format!("no key with kid {kid}"),
        })?;

        let key = DecodingKey::from_jwk(jwk).map_err(|e| AuthError::KeyResolution {
            reason: format!("unusable key material: {e}"),
        })?;

        self.cache.insert(
            kid.to_string(),
            CachedKey {
                key: key.clone(),
                fetched_at: Instant::now(),
            },
        );
        info!(kid, "signing key cached");

        Ok(key)
    }
}

impl std::fmt::Debug for JwksClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwksClient")
            .field("jwks_url", &self.jwks_url)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jwks_url_joins_well_known_path() {
        let client = JwksClient::new("http://localhost:54321").unwrap();
        assert_eq!(
            client.jwks_url,
            "http://localhost:54321/auth/v1/.well-known/jwks.json"
        );
    }

    #[test]
    fn trailing_slash_trimmed() {
        let client = JwksClient::new("http://localhost:54321/").unwrap();
        assert_eq!(
            client.jwks_url,
            "http://localhost:54321/auth/v1/.well-known/jwks.json"
        );
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_key_resolution_failure() {
        // Nothing listens on this port; reqwest fails fast on connect.
        let client = JwksClient::new("http://127.0.0.1:9").unwrap();
        let err = client
            .resolve("any")
            .await
            .err()
            .expect("resolution should fail against an unreachable endpoint");
        assert!(matches!(err, AuthError::KeyResolution { .. }));
    }

    #[test]
    fn default_ttl_is_ten_minutes() {
        assert_eq!(KEY_CACHE_TTL, Duration::from_secs(600));
    }
}
