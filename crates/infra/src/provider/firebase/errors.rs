//! Identity Toolkit error bodies → [`ProviderError`].

use reqwest::StatusCode;
use serde::Deserialize;

use crate::provider::ProviderError;

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// Classify a non-success Identity Toolkit response.
///
/// The API reports the failure kind as the leading token of `error.message`,
/// e.g. `"WEAK_PASSWORD : Password should be at least 6 characters"`.
pub(crate) fn classify(status: StatusCode, body: &str) -> ProviderError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_default();

    let code = message
        .split([' ', ':'])
        .next()
        .unwrap_or_default()
        .trim();

    match code {
        "EMAIL_EXISTS" | "DUPLICATE_EMAIL" => ProviderError::EmailExists,
        "USER_NOT_FOUND" | "EMAIL_NOT_FOUND" => ProviderError::UserNotFound,
        "INVALID_ID_TOKEN" | "TOKEN_EXPIRED" | "USER_DISABLED" => {
            ProviderError::InvalidToken(message.clone())
        }
        "INVALID_EMAIL" | "WEAK_PASSWORD" | "INVALID_PASSWORD" | "MISSING_PASSWORD"
        | "MISSING_EMAIL" | "INVALID_DISPLAY_NAME" | "MISSING_LOCAL_ID" => {
            ProviderError::InvalidArgument(message.clone())
        }
        "PROJECT_NOT_FOUND" | "CONFIGURATION_NOT_FOUND" => {
            ProviderError::Unavailable(message.clone())
        }
        _ if status.is_server_error() => {
            ProviderError::Unavailable(format!("identity toolkit returned {status}"))
        }
        _ if message.is_empty() => ProviderError::Operation(format!("identity toolkit returned {status}")),
        _ => ProviderError::Operation(message),
    }
}
