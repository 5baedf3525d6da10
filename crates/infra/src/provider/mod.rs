//! Identity-provider seam.
//!
//! The gateway never talks to a provider SDK directly. It goes through two
//! traits:
//!
//! - [`IdentityBackend`]: process-wide factory that initializes a handle for
//!   one project (tenant).
//! - [`ProviderApp`]: the per-project handle used by request handlers.
//!
//! Implementations:
//!
//! - [`firebase::FirebaseBackend`]: Firebase Authentication over its REST API.
//! - [`memory::InMemoryBackend`]: deterministic in-process provider for dev/tests.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use authgate_core::{ProjectId, ProviderUid};

pub mod firebase;
pub mod memory;

/// Provider failure, classified so callers can keep the error kind.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The backend could not be reached or refused to initialize.
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),

    #[error("identity provider call timed out")]
    Timeout,

    /// The presented ID token did not verify.
    #[error("invalid ID token: {0}")]
    InvalidToken(String),

    #[error("email address is already in use")]
    EmailExists,

    #[error("user not found")]
    UserNotFound,

    /// The provider rejected an argument (bad email, weak password, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Any other provider-side failure.
    #[error("provider operation failed: {0}")]
    Operation(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_connect() || err.is_request() {
            ProviderError::Unavailable(err.to_string())
        } else {
            ProviderError::Operation(err.to_string())
        }
    }
}

/// Input for user creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub email: String,
    pub password: String,
    pub display_name: String,
}

/// Timestamps the provider keeps for a user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMetadata {
    pub creation_time: Option<DateTime<Utc>>,
    pub last_sign_in_time: Option<DateTime<Utc>>,
}

/// A user record as returned by the provider (serialized in the provider's
/// camelCase shape).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderUser {
    pub uid: ProviderUid,
    pub email: Option<String>,
    pub email_verified: bool,
    pub display_name: Option<String>,
    pub disabled: bool,
    pub metadata: UserMetadata,
}

/// Claims extracted from a verified provider ID token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdToken {
    pub uid: ProviderUid,
    pub email: Option<String>,
    pub email_verified: bool,
    pub name: Option<String>,
}

/// Per-project provider handle.
#[async_trait]
pub trait ProviderApp: Send + Sync {
    fn project_id(&self) -> &ProjectId;

    async fn create_user(&self, user: NewUser) -> Result<ProviderUser, ProviderError>;

    /// Verify an ID token issued to a client of this project.
    ///
    /// Fails with [`ProviderError::InvalidToken`] when the token is malformed,
    /// expired, issued for another project, or has an empty subject.
    async fn verify_id_token(&self, id_token: &str) -> Result<VerifiedIdToken, ProviderError>;

    /// Mint a short-lived custom token the client SDK can exchange.
    async fn create_custom_token(&self, uid: &ProviderUid) -> Result<String, ProviderError>;

    async fn get_user(&self, uid: &ProviderUid) -> Result<ProviderUser, ProviderError>;

    async fn update_email(&self, uid: &ProviderUid, email: &str) -> Result<ProviderUser, ProviderError>;

    async fn delete_user(&self, uid: &ProviderUid) -> Result<(), ProviderError>;

    /// Release the handle. Calls made afterwards fail with `Unavailable`.
    async fn shutdown(&self) -> Result<(), ProviderError>;
}

/// Process-wide factory for per-project handles.
#[async_trait]
pub trait IdentityBackend: Send + Sync {
    async fn initialize(&self, project_id: &ProjectId) -> Result<Arc<dyn ProviderApp>, ProviderError>;
}

#[async_trait]
impl<B> IdentityBackend for Arc<B>
where
    B: IdentityBackend + ?Sized,
{
    async fn initialize(&self, project_id: &ProjectId) -> Result<Arc<dyn ProviderApp>, ProviderError> {
        (**self).initialize(project_id).await
    }
}
