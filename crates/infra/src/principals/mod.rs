//! Local principal storage (records created by social login).

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use authgate_auth::LocalPrincipal;
use authgate_core::{ProjectId, ProviderUid};

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use in_memory::InMemoryPrincipalStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresPrincipalStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("principal store unavailable: {0}")]
    Unavailable(String),

    #[error("stored principal is corrupt: {0}")]
    Corrupt(String),
}

/// Tenant-isolated store of local principals keyed by `(project, provider uid)`.
#[async_trait]
pub trait PrincipalStore: Send + Sync {
    async fn find_by_provider_uid(
        &self,
        project_id: &ProjectId,
        provider_uid: &ProviderUid,
    ) -> Result<Option<LocalPrincipal>, StoreError>;

    /// Insert `candidate` unless a principal already exists for its
    /// `(project_id, provider_uid)`, and return the stored record.
    ///
    /// An existing record wins: its id and role are never replaced.
    async fn upsert_social(&self, candidate: LocalPrincipal) -> Result<LocalPrincipal, StoreError>;
}

#[async_trait]
impl<S> PrincipalStore for Arc<S>
where
    S: PrincipalStore + ?Sized,
{
    async fn find_by_provider_uid(
        &self,
        project_id: &ProjectId,
        provider_uid: &ProviderUid,
    ) -> Result<Option<LocalPrincipal>, StoreError> {
        (**self).find_by_provider_uid(project_id, provider_uid).await
    }

    async fn upsert_social(&self, candidate: LocalPrincipal) -> Result<LocalPrincipal, StoreError> {
        (**self).upsert_social(candidate).await
    }
}
