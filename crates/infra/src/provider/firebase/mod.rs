//! Firebase Authentication backend over the Identity Toolkit REST API.
//!
//! One [`FirebaseBackend`] exists per process. It holds the HTTP client, the
//! service-account key and the shared secure-token key cache. Each
//! [`FirebaseBackend::initialize`] call produces a [`FirebaseApp`] bound to one
//! project: the same key re-targeted at that project id.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use serde_json::json;

use authgate_core::{ProjectId, ProviderUid};

use super::{
    IdentityBackend, NewUser, ProviderApp, ProviderError, ProviderUser, UserMetadata,
    VerifiedIdToken,
};

mod access_token;
pub mod credentials;
mod errors;
mod id_token;

pub use credentials::{CredentialsError, ServiceAccount};
pub use id_token::SECURE_TOKEN_JWKS_URL;

use access_token::AccessTokenSource;
use id_token::JwksCache;

pub const IDENTITY_TOOLKIT_URL: &str = "https://identitytoolkit.googleapis.com";

const CUSTOM_TOKEN_AUDIENCE: &str =
    "https://identitytoolkit.googleapis.com/google.identity.identitytoolkit.v1.IdentityToolkit";
const CUSTOM_TOKEN_TTL_SECS: i64 = 3600;

/// Backend configuration.
#[derive(Debug, Clone)]
pub struct FirebaseConfig {
    pub service_account: ServiceAccount,
    /// Applied to every provider HTTP call.
    pub timeout: Duration,
    pub identity_toolkit_url: String,
    pub jwks_url: String,
}

impl FirebaseConfig {
    pub fn new(service_account: ServiceAccount, timeout: Duration) -> Self {
        Self {
            service_account,
            timeout,
            identity_toolkit_url: IDENTITY_TOOLKIT_URL.to_string(),
            jwks_url: SECURE_TOKEN_JWKS_URL.to_string(),
        }
    }
}

pub struct FirebaseBackend {
    config: FirebaseConfig,
    client: reqwest::Client,
    jwks: Arc<JwksCache>,
}

impl FirebaseBackend {
    pub fn new(config: FirebaseConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("failed to build HTTP client: {e}")))?;
        let jwks = Arc::new(JwksCache::new(config.jwks_url.clone()));

        Ok(Self {
            config,
            client,
            jwks,
        })
    }
}

#[async_trait]
impl IdentityBackend for FirebaseBackend {
    async fn initialize(&self, project_id: &ProjectId) -> Result<Arc<dyn ProviderApp>, ProviderError> {
        let account = self.config.service_account.for_project(project_id);
        let signing_key = EncodingKey::from_rsa_pem(account.private_key.as_bytes()).map_err(|e| {
            ProviderError::Unavailable(format!("service-account private key is unusable: {e}"))
        })?;

        tracing::debug!(project_id = %project_id, "firebase app initialized");

        Ok(Arc::new(FirebaseApp {
            project_id: project_id.clone(),
            base_url: self.config.identity_toolkit_url.trim_end_matches('/').to_string(),
            client: self.client.clone(),
            account,
            signing_key,
            access_token: AccessTokenSource::new(),
            jwks: self.jwks.clone(),
            deleted: AtomicBool::new(false),
        }))
    }
}

/// Handle to one Firebase project.
pub struct FirebaseApp {
    project_id: ProjectId,
    base_url: String,
    client: reqwest::Client,
    account: ServiceAccount,
    signing_key: EncodingKey,
    access_token: AccessTokenSource,
    jwks: Arc<JwksCache>,
    deleted: AtomicBool,
}

#[derive(Serialize)]
struct CustomTokenClaims<'a> {
    iss: &'a str,
    sub: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
    uid: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignUpResponse {
    local_id: String,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<UserInfo>,
}

/// User record in the REST API's shape. Timestamps are millisecond strings.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserInfo {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    disabled: bool,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    last_login_at: Option<String>,
}

fn millis_to_datetime(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let ms = raw?.parse::<i64>().ok()?;
    Utc.timestamp_millis_opt(ms).single()
}

impl TryFrom<UserInfo> for ProviderUser {
    type Error = ProviderError;

    fn try_from(info: UserInfo) -> Result<Self, Self::Error> {
        let uid = info
            .local_id
            .parse()
            .map_err(|_| ProviderError::Operation("provider returned an empty uid".into()))?;

        Ok(ProviderUser {
            uid,
            email: info.email,
            email_verified: info.email_verified,
            display_name: info.display_name,
            disabled: info.disabled,
            metadata: UserMetadata {
                creation_time: millis_to_datetime(info.created_at.as_deref()),
                last_sign_in_time: millis_to_datetime(info.last_login_at.as_deref()),
            },
        })
    }
}

impl FirebaseApp {
    fn ensure_live(&self) -> Result<(), ProviderError> {
        if self.deleted.load(Ordering::Acquire) {
            return Err(ProviderError::Unavailable(format!(
                "firebase app for '{}' has been deleted",
                self.project_id
            )));
        }
        Ok(())
    }

    fn accounts_url(&self, method: &str) -> String {
        format!(
            "{}/v1/projects/{}/accounts{}",
            self.base_url, self.project_id, method
        )
    }

    /// POST an authenticated admin call and decode the JSON response.
    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T, ProviderError> {
        self.ensure_live()?;
        let token = self
            .access_token
            .get(&self.client, &self.account, &self.signing_key)
            .await?;

        let res = self
            .client
            .post(self.accounts_url(method))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            let err = errors::classify(status, &text);
            tracing::error!(
                project_id = %self.project_id,
                method,
                %status,
                error = %err,
                "identity toolkit call failed"
            );
            return Err(err);
        }

        Ok(res.json::<T>().await?)
    }
}

#[async_trait]
impl ProviderApp for FirebaseApp {
    fn project_id(&self) -> &ProjectId {
        &self.project_id
    }

    async fn create_user(&self, user: NewUser) -> Result<ProviderUser, ProviderError> {
        let created: SignUpResponse = self
            .call(
                "",
                json!({
                    "email": user.email,
                    "password": user.password,
                    "displayName": user.display_name,
                }),
            )
            .await?;

        let uid: ProviderUid = created
            .local_id
            .parse()
            .map_err(|_| ProviderError::Operation("provider returned an empty uid".into()))?;
        self.get_user(&uid).await
    }

    async fn verify_id_token(&self, id_token: &str) -> Result<VerifiedIdToken, ProviderError> {
        self.ensure_live()?;
        self.jwks
            .verify(&self.client, self.project_id.as_str(), id_token)
            .await
    }

    async fn create_custom_token(&self, uid: &ProviderUid) -> Result<String, ProviderError> {
        self.ensure_live()?;
        let now = Utc::now().timestamp();
        let claims = CustomTokenClaims {
            iss: &self.account.client_email,
            sub: &self.account.client_email,
            aud: CUSTOM_TOKEN_AUDIENCE,
            iat: now,
            exp: now + CUSTOM_TOKEN_TTL_SECS,
            uid: uid.as_str(),
        };

        encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
            .map_err(|e| ProviderError::Operation(format!("failed to sign custom token: {e}")))
    }

    async fn get_user(&self, uid: &ProviderUid) -> Result<ProviderUser, ProviderError> {
        let found: LookupResponse = self
            .call(":lookup", json!({ "localId": [uid.as_str()] }))
            .await?;

        found
            .users
            .into_iter()
            .next()
            .ok_or(ProviderError::UserNotFound)?
            .try_into()
    }

    async fn update_email(&self, uid: &ProviderUid, email: &str) -> Result<ProviderUser, ProviderError> {
        let _: serde_json::Value = self
            .call(":update", json!({ "localId": uid.as_str(), "email": email }))
            .await?;
        self.get_user(uid).await
    }

    async fn delete_user(&self, uid: &ProviderUid) -> Result<(), ProviderError> {
        let _: serde_json::Value = self
            .call(":delete", json!({ "localId": uid.as_str() }))
            .await?;
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ProviderError> {
        if self.deleted.swap(true, Ordering::AcqRel) {
            return Err(ProviderError::Unavailable(format!(
                "firebase app for '{}' was already deleted",
                self.project_id
            )));
        }
        self.access_token.clear().await;
        tracing::debug!(project_id = %self.project_id, "firebase app deleted");
        Ok(())
    }
}
