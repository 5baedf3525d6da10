//! Firebase ID-token verification against Google's secure-token keys.

use std::time::{Duration, Instant};

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header, jwk::JwkSet};
use serde::Deserialize;
use tokio::sync::Mutex;

use authgate_core::ProviderUid;

use crate::provider::{ProviderError, VerifiedIdToken};

pub const SECURE_TOKEN_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

const KEYS_MAX_AGE: Duration = Duration::from_secs(3600);
const KEYS_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    #[serde(default)]
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_verified: Option<bool>,
    #[serde(default)]
    name: Option<String>,
}

/// Public keys shared by every project (Google signs all Firebase ID tokens
/// with the same key set).
pub(crate) struct JwksCache {
    url: String,
    state: Mutex<KeyState>,
}

#[derive(Default)]
struct KeyState {
    keys: Option<(JwkSet, Instant)>,
    last_fetch: Option<Instant>,
}

enum KeyLookup {
    Cached(JwkSet),
    Fetch,
    /// A fetch happened too recently; answer from whatever is cached.
    Throttled(Option<JwkSet>),
}

impl KeyState {
    fn lookup(&self, kid: &str, now: Instant) -> KeyLookup {
        if let Some((set, fetched_at)) = &self.keys {
            if now.duration_since(*fetched_at) < KEYS_MAX_AGE && set.find(kid).is_some() {
                return KeyLookup::Cached(set.clone());
            }
        }
        match self.last_fetch {
            Some(at) if now.duration_since(at) < KEYS_MIN_REFRESH_INTERVAL => {
                KeyLookup::Throttled(self.keys.as_ref().map(|(set, _)| set.clone()))
            }
            _ => KeyLookup::Fetch,
        }
    }
}

impl JwksCache {
    pub(crate) fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            state: Mutex::new(KeyState::default()),
        }
    }

    /// Keys containing `kid`, refreshing when stale or when `kid` is unknown
    /// (Google rotates keys without notice). Fetches are serialized and at
    /// most one happens per `KEYS_MIN_REFRESH_INTERVAL`.
    async fn keys_for(&self, client: &reqwest::Client, kid: &str) -> Result<JwkSet, ProviderError> {
        let mut state = self.state.lock().await;
        match state.lookup(kid, Instant::now()) {
            KeyLookup::Cached(set) | KeyLookup::Throttled(Some(set)) => return Ok(set),
            KeyLookup::Throttled(None) => {
                return Err(ProviderError::Unavailable(
                    "secure-token keys are not available yet".into(),
                ));
            }
            KeyLookup::Fetch => {}
        }

        state.last_fetch = Some(Instant::now());
        let res = client.get(&self.url).send().await?;
        if !res.status().is_success() {
            return Err(ProviderError::Unavailable(format!(
                "key endpoint returned {}",
                res.status()
            )));
        }
        let set: JwkSet = res.json().await?;
        tracing::debug!(keys = set.keys.len(), "refreshed secure-token keys");

        state.keys = Some((set.clone(), Instant::now()));
        Ok(set)
    }

    pub(crate) async fn verify(
        &self,
        client: &reqwest::Client,
        project_id: &str,
        token: &str,
    ) -> Result<VerifiedIdToken, ProviderError> {
        let header = decode_header(token).map_err(|e| ProviderError::InvalidToken(e.to_string()))?;
        let kid = header
            .kid
            .ok_or_else(|| ProviderError::InvalidToken("missing 'kid' header".into()))?;

        let keys = self.keys_for(client, &kid).await?;
        verify_with_keys(&keys, project_id, token)
    }
}

/// Verify `token` for `project_id` with an explicit key set.
pub(crate) fn verify_with_keys(
    keys: &JwkSet,
    project_id: &str,
    token: &str,
) -> Result<VerifiedIdToken, ProviderError> {
    let header = decode_header(token).map_err(|e| ProviderError::InvalidToken(e.to_string()))?;
    if header.alg != Algorithm::RS256 {
        return Err(ProviderError::InvalidToken(format!(
            "unexpected algorithm {:?}",
            header.alg
        )));
    }
    let kid = header
        .kid
        .ok_or_else(|| ProviderError::InvalidToken("missing 'kid' header".into()))?;
    let jwk = keys
        .find(&kid)
        .ok_or_else(|| ProviderError::InvalidToken(format!("unknown signing key '{kid}'")))?;
    let key = DecodingKey::from_jwk(jwk).map_err(|e| ProviderError::InvalidToken(e.to_string()))?;

    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_audience(&[project_id]);
    validation.set_issuer(&[format!("https://securetoken.google.com/{project_id}")]);

    let data = decode::<IdTokenClaims>(token, &key, &validation)
        .map_err(|e| ProviderError::InvalidToken(e.to_string()))?;

    let uid: ProviderUid = data
        .claims
        .sub
        .parse()
        .map_err(|_| ProviderError::InvalidToken("token has no subject".into()))?;

    Ok(VerifiedIdToken {
        uid,
        email: data.claims.email,
        email_verified: data.claims.email_verified.unwrap_or(false),
        name: data.claims.name,
    })
}
