use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use authgate_auth::LocalPrincipal;
use authgate_core::{ProjectId, ProviderUid};

use super::{PrincipalStore, StoreError};

/// In-memory principal store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryPrincipalStore {
    inner: RwLock<HashMap<(ProjectId, ProviderUid), LocalPrincipal>>,
}

impl InMemoryPrincipalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PrincipalStore for InMemoryPrincipalStore {
    async fn find_by_provider_uid(
        &self,
        project_id: &ProjectId,
        provider_uid: &ProviderUid,
    ) -> Result<Option<LocalPrincipal>, StoreError> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(map.get(&(project_id.clone(), provider_uid.clone())).cloned())
    }

    async fn upsert_social(&self, candidate: LocalPrincipal) -> Result<LocalPrincipal, StoreError> {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let key = (candidate.project_id.clone(), candidate.provider_uid.clone());
        Ok(map.entry(key).or_insert(candidate).clone())
    }
}
