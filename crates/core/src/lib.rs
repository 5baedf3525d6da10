//! `authgate-core`: identifiers and error types shared by every crate.
//!
//! This crate has no IO and no knowledge of HTTP or of the identity provider.

pub mod error;
pub mod id;

pub use error::DomainError;
pub use id::{LocalPrincipalId, ProjectId, ProviderUid};
