use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use authgate_core::{LocalPrincipalId, ProjectId, ProviderUid};

/// Role label attached to a local principal.
///
/// Roles are opaque strings here; what a role grants is decided by the
/// services consuming the local credential.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    /// Role given to principals first seen through social login, unless configured.
    pub const DEFAULT_SOCIAL: Role = Role(Cow::Borrowed("candidate"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Locally stored principal, created on the first social login of a provider user.
///
/// # Invariants
/// - `(project_id, provider_uid)` identifies at most one record.
/// - `id` never changes once assigned; credentials minted for it stay valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalPrincipal {
    pub id: LocalPrincipalId,
    pub project_id: ProjectId,
    pub provider_uid: ProviderUid,
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Role,
    pub social_login: bool,
    pub created_at: DateTime<Utc>,
}

impl LocalPrincipal {
    pub fn social(
        project_id: ProjectId,
        provider_uid: ProviderUid,
        name: Option<String>,
        email: Option<String>,
        role: Role,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: LocalPrincipalId::new(),
            project_id,
            provider_uid,
            name,
            email,
            role,
            social_login: true,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn social_principal_is_flagged_and_gets_a_fresh_id() {
        let project: ProjectId = "acme".parse().unwrap();
        let uid: ProviderUid = "u-1".parse().unwrap();
        let a = LocalPrincipal::social(
            project.clone(),
            uid.clone(),
            Some("Ada".into()),
            None,
            Role::DEFAULT_SOCIAL,
            Utc::now(),
        );
        let b = LocalPrincipal::social(project, uid, None, None, Role::new("admin"), Utc::now());

        assert!(a.social_login);
        assert_eq!(a.role.as_str(), "candidate");
        assert_ne!(a.id, b.id);
    }
}
