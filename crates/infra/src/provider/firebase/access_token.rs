//! OAuth2 access tokens for the Identity Toolkit admin API (JWT-bearer grant).

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::provider::ProviderError;

use super::credentials::ServiceAccount;

const SCOPES: &str =
    "https://www.googleapis.com/auth/identitytoolkit https://www.googleapis.com/auth/cloud-platform";
const GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_TTL_SECS: i64 = 3600;

/// Tokens are refreshed this long before the server-side expiry.
const REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    ASSERTION_TTL_SECS
}

#[derive(Clone)]
struct CachedToken {
    value: String,
    refresh_at: DateTime<Utc>,
}

/// Per-handle access-token cache.
pub(crate) struct AccessTokenSource {
    cached: Mutex<Option<CachedToken>>,
}

impl AccessTokenSource {
    pub(crate) fn new() -> Self {
        Self {
            cached: Mutex::new(None),
        }
    }

    pub(crate) async fn get(
        &self,
        client: &reqwest::Client,
        account: &ServiceAccount,
        key: &EncodingKey,
    ) -> Result<String, ProviderError> {
        // Held across the fetch so concurrent callers wait for one exchange.
        let mut cached = self.cached.lock().await;
        let now = Utc::now();
        if let Some(token) = cached.as_ref().filter(|t| t.refresh_at > now) {
            return Ok(token.value.clone());
        }

        let fresh = fetch(client, account, key, now).await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }

    pub(crate) async fn clear(&self) {
        *self.cached.lock().await = None;
    }
}

pub(crate) fn sign_assertion(
    account: &ServiceAccount,
    key: &EncodingKey,
    now: DateTime<Utc>,
) -> Result<String, ProviderError> {
    let claims = AssertionClaims {
        iss: &account.client_email,
        scope: SCOPES,
        aud: &account.token_uri,
        iat: now.timestamp(),
        exp: now.timestamp() + ASSERTION_TTL_SECS,
    };
    let mut header = Header::new(Algorithm::RS256);
    header.kid = account.private_key_id.clone();

    encode(&header, &claims, key)
        .map_err(|e| ProviderError::Unavailable(format!("failed to sign token assertion: {e}")))
}

async fn fetch(
    client: &reqwest::Client,
    account: &ServiceAccount,
    key: &EncodingKey,
    now: DateTime<Utc>,
) -> Result<CachedToken, ProviderError> {
    let assertion = sign_assertion(account, key, now)?;

    let res = client
        .post(&account.token_uri)
        .form(&[("grant_type", GRANT_TYPE), ("assertion", assertion.as_str())])
        .send()
        .await?;

    let status = res.status();
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        tracing::error!(%status, body = %body, "service-account token exchange rejected");
        return Err(ProviderError::Unavailable(format!(
            "token endpoint returned {status}"
        )));
    }

    let token: TokenResponse = res.json().await?;
    tracing::debug!(expires_in = token.expires_in, "obtained provider access token");

    Ok(CachedToken {
        value: token.access_token,
        refresh_at: now + Duration::seconds((token.expires_in - REFRESH_MARGIN_SECS).max(0)),
    })
}
