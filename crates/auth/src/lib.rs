//! `authgate-auth`: local credentials and request-input rules.
//!
//! This crate is decoupled from HTTP and from the identity provider.

pub mod claims;
pub mod issuer;
pub mod principal;
pub mod validation;

pub use claims::{SessionClaims, TokenValidationError, validate_claims};
pub use issuer::{TokenError, TokenIssuer, TokenIssuerConfig};
pub use principal::{LocalPrincipal, Role};
pub use validation::{FieldError, validate_email, validate_registration};
