//! Infrastructure layer: identity-provider backends, request-scoped provider
//! sessions and local principal storage.

pub mod principals;
pub mod provider;
pub mod session;

pub use principals::{InMemoryPrincipalStore, PrincipalStore, StoreError};
pub use provider::{IdentityBackend, ProviderApp, ProviderError};
pub use session::{ProviderSession, SessionError, SessionManager};
