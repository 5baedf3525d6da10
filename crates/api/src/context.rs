use authgate_core::ProjectId;

/// Tenant context for a request, taken from the `project-id` header.
///
/// Present on every authentication route; discarded when the request ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    project_id: ProjectId,
}

impl TenantContext {
    pub fn new(project_id: ProjectId) -> Self {
        Self { project_id }
    }

    pub fn project_id(&self) -> &ProjectId {
        &self.project_id
    }
}

/// Provider ID token presented as `Authorization: Bearer <token>`.
///
/// Only syntactically checked; verification happens against the request's
/// provider session in the handler.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("BearerToken(..)")
    }
}
