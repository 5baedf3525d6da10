//! Local session credential issuing (HS256 JWT).

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use thiserror::Error;

use crate::claims::{SessionClaims, TokenValidationError, validate_claims};

/// Credential lifetime used when `JWT_EXPIRATION_DAYS` is unset.
pub const DEFAULT_TTL_DAYS: i64 = 30;

/// Longest accepted `JWT_EXPIRATION_DAYS`.
pub const MAX_TTL_DAYS: i64 = 3650;

/// Key used when `JWT_SECRET` is unset. Never use outside development.
pub const INSECURE_DEV_SECRET: &str = "dev-secret";

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("JWT_SECRET is not set and AUTHGATE_REQUIRE_JWT_SECRET is enabled")]
    MissingSecret,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("credential expiry is out of range")]
    ExpiryOutOfRange,

    #[error("failed to sign credential: {0}")]
    Encode(#[source] jsonwebtoken::errors::Error),

    #[error("invalid credential: {0}")]
    Invalid(#[source] jsonwebtoken::errors::Error),

    #[error(transparent)]
    Claims(#[from] TokenValidationError),
}

/// Signing configuration for local credentials.
#[derive(Clone)]
pub struct TokenIssuerConfig {
    secret: String,
    ttl: Duration,
    insecure_default: bool,
}

impl core::fmt::Debug for TokenIssuerConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenIssuerConfig")
            .field("secret", &"<redacted>")
            .field("ttl", &self.ttl)
            .field("insecure_default", &self.insecure_default)
            .finish()
    }
}

impl TokenIssuerConfig {
    pub fn new(secret: impl Into<String>, ttl: Duration) -> Self {
        Self {
            secret: secret.into(),
            ttl,
            insecure_default: false,
        }
    }

    /// Read `JWT_SECRET`, `JWT_EXPIRATION_DAYS` and `AUTHGATE_REQUIRE_JWT_SECRET`
    /// through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, TokenError> {
        let require_secret = match lookup("AUTHGATE_REQUIRE_JWT_SECRET") {
            Some(v) => v.parse::<bool>().map_err(|_| {
                TokenError::InvalidConfig(format!("AUTHGATE_REQUIRE_JWT_SECRET={v} is not a bool"))
            })?,
            None => false,
        };

        let ttl_days = match lookup("JWT_EXPIRATION_DAYS") {
            Some(v) => match v.parse::<i64>() {
                Ok(days) if (1..=MAX_TTL_DAYS).contains(&days) => days,
                _ => {
                    return Err(TokenError::InvalidConfig(format!(
                        "JWT_EXPIRATION_DAYS={v} must be an integer between 1 and {MAX_TTL_DAYS}"
                    )));
                }
            },
            None => DEFAULT_TTL_DAYS,
        };

        let (secret, insecure_default) = match lookup("JWT_SECRET").filter(|s| !s.is_empty()) {
            Some(secret) => (secret, false),
            None if require_secret => return Err(TokenError::MissingSecret),
            None => {
                tracing::warn!("JWT_SECRET not set; using insecure dev default");
                (INSECURE_DEV_SECRET.to_string(), true)
            }
        };

        Ok(Self {
            secret,
            ttl: Duration::days(ttl_days),
            insecure_default,
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// True when the signing key is the built-in development default.
    pub fn uses_insecure_default(&self) -> bool {
        self.insecure_default
    }
}

/// Signs and verifies local session credentials.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl core::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenIssuer").field("ttl", &self.ttl).finish_non_exhaustive()
    }
}

impl TokenIssuer {
    pub fn new(config: &TokenIssuerConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.secret.as_bytes()),
            ttl: config.ttl,
        }
    }

    /// Issue a credential for `principal_id`, valid from now for the configured TTL.
    pub fn issue(&self, principal_id: &str) -> Result<String, TokenError> {
        self.issue_at(principal_id, Utc::now())
    }

    pub fn issue_at(&self, principal_id: &str, now: DateTime<Utc>) -> Result<String, TokenError> {
        let expires = now
            .checked_add_signed(self.ttl)
            .ok_or(TokenError::ExpiryOutOfRange)?;
        let claims = SessionClaims {
            id: principal_id.to_string(),
            iat: now.timestamp(),
            exp: expires.timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).map_err(TokenError::Encode)
    }

    /// Verify signature and expiry, returning the decoded claims.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let data = decode::<SessionClaims>(token, &self.decoding, &validation)
            .map_err(TokenError::Invalid)?;
        validate_claims(&data.claims, Utc::now())?;
        Ok(data.claims)
    }
}
