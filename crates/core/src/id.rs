//! Strongly-typed identifiers.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Longest project id accepted from a request header.
pub const MAX_PROJECT_ID_LEN: usize = 128;

/// Identifier of an identity-provider project (the tenant boundary).
///
/// Supplied per request in the `project-id` header.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProjectId(String);

/// User id assigned by the identity provider (Firebase `uid` / `localId`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProviderUid(String);

/// Identifier of a locally stored principal record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalPrincipalId(Uuid);

macro_rules! impl_string_newtype {
    ($t:ty, $name:literal, $check:path) => {
        impl $t {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl TryFrom<String> for $t {
            type Error = DomainError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                $check(&value).map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(value))
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::try_from(s.to_string())
            }
        }
    };
}

fn check_project_id(s: &str) -> Result<(), &'static str> {
    if s.is_empty() {
        return Err("must not be empty");
    }
    if s.len() > MAX_PROJECT_ID_LEN {
        return Err("too long");
    }
    if !s
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    {
        return Err("only ASCII letters, digits, '-' and '_' are allowed");
    }
    Ok(())
}

fn check_provider_uid(s: &str) -> Result<(), &'static str> {
    // Firebase caps uids at 128 characters.
    if s.is_empty() {
        return Err("must not be empty");
    }
    if s.len() > 128 {
        return Err("too long");
    }
    Ok(())
}

impl_string_newtype!(ProjectId, "ProjectId", check_project_id);
impl_string_newtype!(ProviderUid, "ProviderUid", check_provider_uid);

impl LocalPrincipalId {
    /// Create a new identifier.
    ///
    /// Uses UUIDv7 (time-ordered).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for LocalPrincipalId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for LocalPrincipalId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for LocalPrincipalId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl FromStr for LocalPrincipalId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::from_str(s)
            .map_err(|e| DomainError::invalid_id(format!("LocalPrincipalId: {}", e)))?;
        Ok(Self(uuid))
    }
}
