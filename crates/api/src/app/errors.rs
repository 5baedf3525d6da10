use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use authgate_auth::{FieldError, TokenError};
use authgate_infra::{ProviderError, SessionError, StoreError};

/// Every failure a handler or middleware can answer with.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Configuration(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("request validation failed")]
    Validation(Vec<FieldError>),

    #[error("malformed request body: {0}")]
    InvalidBody(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::MissingProject | SessionError::InvalidProject(_) => {
                ApiError::Configuration(err.to_string())
            }
            SessionError::Unavailable { source, .. } => ApiError::Provider(source),
        }
    }
}

impl ApiError {
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        ApiError::Unauthorized(reason.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Configuration(_) | ApiError::Validation(_) | ApiError::InvalidBody(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Provider(e) => match e {
                ProviderError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                ProviderError::Timeout => StatusCode::GATEWAY_TIMEOUT,
                ProviderError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
                ProviderError::EmailExists => StatusCode::CONFLICT,
                ProviderError::UserNotFound => StatusCode::NOT_FOUND,
                ProviderError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
                ProviderError::Operation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Token(_) | ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Configuration(_) => "configuration_error",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Validation(_) => "validation_error",
            ApiError::InvalidBody(_) => "invalid_body",
            ApiError::Provider(e) => match e {
                ProviderError::Unavailable(_) => "provider_unavailable",
                ProviderError::Timeout => "provider_timeout",
                ProviderError::InvalidToken(_) => "unauthorized",
                ProviderError::EmailExists => "email_exists",
                ProviderError::UserNotFound => "user_not_found",
                ProviderError::InvalidArgument(_) => "invalid_argument",
                ProviderError::Operation(_) => "provider_error",
            },
            ApiError::Token(_) => "token_error",
            ApiError::Store(_) => "store_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "request failed");
        } else {
            tracing::debug!(error = %self, code = self.code(), "request rejected");
        }

        match self {
            ApiError::Validation(errors) => (
                status,
                axum::Json(json!({
                    "message": "Validation error",
                    "errors": errors,
                })),
            )
                .into_response(),
            // Internal details stay in the log.
            ApiError::Token(_) | ApiError::Store(_) => {
                json_error(status, self.code(), "internal server error")
            }
            other => json_error(status, other.code(), other.to_string()),
        }
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
