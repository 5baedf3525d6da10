//! Process configuration, read once at startup from the environment.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use authgate_auth::{Role, TokenError, TokenIssuerConfig};
use authgate_infra::session::DEFAULT_MAX_IDLE_HANDLES;

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_BASE_PATH: &str = "/v1/user/auth";
pub const DEFAULT_SERVICE_ACCOUNT_PATH: &str = "firebaseServiceAccountKey.json";
pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key}={value} is invalid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error(transparent)]
    Token(#[from] TokenError),
}

/// Which identity provider implementation serves the tenants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Firebase,
    /// In-process provider; development and tests only.
    Memory,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: IpAddr,
    pub port: u16,
    /// Route prefix, normalized to `""` (root) or `/segment[/segment...]`.
    pub base_path: String,
    pub token: TokenIssuerConfig,
    pub backend: BackendKind,
    pub service_account_path: PathBuf,
    pub provider_timeout: Duration,
    /// Keep idle per-project provider handles between requests.
    pub cache_handles: bool,
    /// Upper bound on cached handles no request is using.
    pub max_idle_handles: usize,
    pub social_login_default_role: Role,
    pub database_url: Option<String>,
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend = match get("IDENTITY_BACKEND").as_deref().map(str::trim) {
            None | Some("firebase") => BackendKind::Firebase,
            Some("memory") => BackendKind::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "IDENTITY_BACKEND",
                    value: other.to_string(),
                    reason: "expected 'firebase' or 'memory'",
                });
            }
        };

        let provider_timeout_secs: u64 = parse_or(
            "PROVIDER_TIMEOUT_SECS",
            get("PROVIDER_TIMEOUT_SECS"),
            DEFAULT_PROVIDER_TIMEOUT_SECS,
        )?;
        if provider_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "PROVIDER_TIMEOUT_SECS",
                value: "0".into(),
                reason: "must be at least 1",
            });
        }

        Ok(Self {
            bind_addr: parse_or("BIND_ADDR", get("BIND_ADDR"), IpAddr::V4(Ipv4Addr::UNSPECIFIED))?,
            port: parse_or("PORT", get("PORT"), DEFAULT_PORT)?,
            // An explicitly empty BASE_PATH mounts the routes at the root.
            base_path: normalize_base_path(lookup("BASE_PATH").as_deref().unwrap_or(DEFAULT_BASE_PATH)),
            token: TokenIssuerConfig::from_lookup(&lookup)?,
            backend,
            service_account_path: get("FIREBASE_SERVICE_ACCOUNT")
                .or_else(|| get("GOOGLE_APPLICATION_CREDENTIALS"))
                .unwrap_or_else(|| DEFAULT_SERVICE_ACCOUNT_PATH.to_string())
                .into(),
            provider_timeout: Duration::from_secs(provider_timeout_secs),
            cache_handles: parse_or("SESSION_CACHE_HANDLES", get("SESSION_CACHE_HANDLES"), true)?,
            max_idle_handles: parse_or(
                "SESSION_MAX_IDLE_HANDLES",
                get("SESSION_MAX_IDLE_HANDLES"),
                DEFAULT_MAX_IDLE_HANDLES,
            )?,
            social_login_default_role: get("SOCIAL_LOGIN_DEFAULT_ROLE")
                .map(|r| Role::new(r.trim().to_string()))
                .unwrap_or(Role::DEFAULT_SOCIAL),
            database_url: get("DATABASE_URL"),
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }
}

fn parse_or<T: FromStr>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            key,
            value,
            reason: "could not be parsed",
        }),
    }
}

/// `""` and `"/"` mean root; otherwise one leading slash and no trailing slash.
pub fn normalize_base_path(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}
