use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use authgate_core::ProjectId;

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("failed to read credential file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed service-account JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("credential type is '{0}', expected 'service_account'")]
    NotServiceAccount(String),
}

/// Google service-account key, as downloaded from the Firebase console.
#[derive(Clone, Deserialize)]
pub struct ServiceAccount {
    #[serde(rename = "type")]
    pub kind: String,
    pub project_id: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    pub private_key: String,
    pub client_email: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl core::fmt::Debug for ServiceAccount {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ServiceAccount")
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .field("private_key_id", &self.private_key_id)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

impl ServiceAccount {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CredentialsError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| CredentialsError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, CredentialsError> {
        let account: ServiceAccount = serde_json::from_str(raw)?;
        if account.kind != "service_account" {
            return Err(CredentialsError::NotServiceAccount(account.kind));
        }
        Ok(account)
    }

    /// The same key, re-targeted at another project.
    pub fn for_project(&self, project_id: &ProjectId) -> Self {
        Self {
            project_id: project_id.to_string(),
            ..self.clone()
        }
    }
}
