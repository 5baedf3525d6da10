//! Service wiring: identity backend, session manager, token issuer and
//! principal store, built from [`ApiConfig`].

use std::sync::Arc;

use anyhow::Context;

use authgate_auth::{Role, TokenIssuer};
use authgate_infra::provider::firebase::{FirebaseBackend, FirebaseConfig, ServiceAccount};
use authgate_infra::provider::memory::InMemoryBackend;
use authgate_infra::{IdentityBackend, InMemoryPrincipalStore, PrincipalStore, SessionManager};

use crate::config::{ApiConfig, BackendKind};

/// Shared, request-independent services handed to handlers.
pub struct AppServices {
    pub issuer: TokenIssuer,
    pub principals: Arc<dyn PrincipalStore>,
    pub social_login_default_role: Role,
}

impl AppServices {
    pub fn new(issuer: TokenIssuer, principals: Arc<dyn PrincipalStore>, social_login_default_role: Role) -> Self {
        Self {
            issuer,
            principals,
            social_login_default_role,
        }
    }
}

pub fn build_backend(config: &ApiConfig) -> anyhow::Result<Arc<dyn IdentityBackend>> {
    match config.backend {
        BackendKind::Firebase => {
            let account = ServiceAccount::from_file(&config.service_account_path).with_context(|| {
                format!(
                    "loading service account from {}",
                    config.service_account_path.display()
                )
            })?;
            tracing::info!(
                client_email = %account.client_email,
                timeout_secs = config.provider_timeout.as_secs(),
                "using Firebase identity backend"
            );
            let backend = FirebaseBackend::new(FirebaseConfig::new(account, config.provider_timeout))
                .context("building Firebase backend")?;
            Ok(Arc::new(backend))
        }
        BackendKind::Memory => {
            tracing::warn!("using in-memory identity backend; users are not persisted");
            Ok(Arc::new(InMemoryBackend::new()))
        }
    }
}

pub async fn build_principal_store(config: &ApiConfig) -> anyhow::Result<Arc<dyn PrincipalStore>> {
    match config.database_url.as_deref() {
        #[cfg(feature = "postgres")]
        Some(url) => {
            let store = authgate_infra::principals::PostgresPrincipalStore::connect(url)
                .await
                .context("connecting to the principal database")?;
            store.migrate().await.context("migrating the principal database")?;
            tracing::info!("using Postgres principal store");
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "postgres"))]
        Some(_) => {
            tracing::warn!("DATABASE_URL is set but the postgres feature is disabled; using in-memory principal store");
            Ok(Arc::new(InMemoryPrincipalStore::new()))
        }
        None => Ok(Arc::new(InMemoryPrincipalStore::new())),
    }
}

/// Build everything the router needs from configuration.
pub async fn build_services(config: &ApiConfig) -> anyhow::Result<(Arc<AppServices>, Arc<SessionManager>)> {
    let backend = build_backend(config)?;
    let sessions = Arc::new(SessionManager::with_limits(
        backend,
        config.cache_handles,
        config.max_idle_handles,
    ));

    let principals = build_principal_store(config).await?;
    let services = AppServices::new(
        TokenIssuer::new(&config.token),
        principals,
        config.social_login_default_role.clone(),
    );

    Ok((Arc::new(services), sessions))
}
