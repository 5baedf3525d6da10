use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Extension, rejection::JsonRejection},
    http::StatusCode,
};
use chrono::Utc;

use authgate_auth::{FieldError, LocalPrincipal, validate_email, validate_registration};
use authgate_infra::ProviderSession;
use authgate_infra::provider::{NewUser, VerifiedIdToken};

use crate::app::dto::{
    LoginResponse, MessageResponse, RegisterRequest, RegisterResponse, SocialLoginRequest,
    SocialLoginResponse, UpdateEmailRequest,
};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::context::{BearerToken, TenantContext};

/// Exchange a provider ID token for its verified subject.
async fn verify(session: &ProviderSession, id_token: &str) -> Result<VerifiedIdToken, ApiError> {
    session.app().verify_id_token(id_token).await.map_err(|e| {
        tracing::debug!(project_id = %session.project_id(), error = %e, "ID token rejected");
        ApiError::from(e)
    })
}

pub async fn register(
    Extension(session): Extension<ProviderSession>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let Json(body) = body.map_err(|e| ApiError::InvalidBody(e.body_text()))?;
    validate_registration(
        body.name.as_deref(),
        body.email.as_deref(),
        body.password.as_deref(),
    )
    .map_err(ApiError::Validation)?;

    let user = session
        .app()
        .create_user(NewUser {
            email: body.email.unwrap_or_default(),
            password: body.password.unwrap_or_default(),
            display_name: body.name.unwrap_or_default().trim().to_string(),
        })
        .await?;

    tracing::info!(project_id = %session.project_id(), uid = %user.uid, "user registered");

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "User created",
            user,
        }),
    ))
}

pub async fn login(
    Extension(session): Extension<ProviderSession>,
    Extension(services): Extension<Arc<AppServices>>,
    Extension(token): Extension<BearerToken>,
) -> Result<Json<LoginResponse>, ApiError> {
    let verified = verify(&session, token.as_str()).await?;

    let jw_token = services.issuer.issue(verified.uid.as_str())?;
    let firebase_auth_token = session.app().create_custom_token(&verified.uid).await?;

    tracing::info!(project_id = %session.project_id(), uid = %verified.uid, "user logged in");

    Ok(Json(LoginResponse {
        jw_token,
        firebase_auth_token,
    }))
}

/// Update the caller's email address.
///
/// With a JSON body `{"email": ...}` that address is used; without a body the
/// email is re-synchronized from the verified token's `email` claim.
pub async fn update_user(
    Extension(session): Extension<ProviderSession>,
    Extension(token): Extension<BearerToken>,
    body: Bytes,
) -> Result<Json<MessageResponse>, ApiError> {
    let verified = verify(&session, token.as_str()).await?;

    let body: UpdateEmailRequest = if body.iter().all(u8::is_ascii_whitespace) {
        UpdateEmailRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::InvalidBody(e.to_string()))?
    };

    let email = body
        .email
        .or(verified.email)
        .filter(|e| validate_email(e))
        .ok_or_else(|| {
            ApiError::Validation(vec![FieldError::body(
                "email",
                None,
                "Please include a valid e-mail",
            )])
        })?;

    session.app().update_email(&verified.uid, &email).await?;
    tracing::info!(project_id = %session.project_id(), uid = %verified.uid, "user email updated");

    Ok(Json(MessageResponse {
        message: "User updated successfully",
    }))
}

pub async fn delete_user(
    Extension(session): Extension<ProviderSession>,
    Extension(token): Extension<BearerToken>,
) -> Result<Json<MessageResponse>, ApiError> {
    let verified = verify(&session, token.as_str()).await?;

    session.app().delete_user(&verified.uid).await?;
    tracing::info!(project_id = %session.project_id(), uid = %verified.uid, "user deleted");

    Ok(Json(MessageResponse {
        message: "User deleted successfully",
    }))
}

/// Sign in with a provider ID token obtained through a social identity
/// provider, creating the local principal on first sight.
pub async fn social_login(
    Extension(session): Extension<ProviderSession>,
    Extension(tenant): Extension<TenantContext>,
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<SocialLoginRequest>, JsonRejection>,
) -> Result<Json<SocialLoginResponse>, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::InvalidBody(e.body_text()))?;
    let id_token = body
        .id_token
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| {
            ApiError::Validation(vec![FieldError::body("idToken", None, "ID token is required")])
        })?;

    let verified = verify(&session, id_token.trim()).await?;

    let candidate = LocalPrincipal::social(
        tenant.project_id().clone(),
        verified.uid,
        verified.name,
        verified.email,
        services.social_login_default_role.clone(),
        Utc::now(),
    );
    let principal = services.principals.upsert_social(candidate).await?;

    let jw_token = services.issuer.issue(&principal.id.to_string())?;
    tracing::info!(
        project_id = %principal.project_id,
        uid = %principal.provider_uid,
        principal_id = %principal.id,
        "social login"
    );

    Ok(Json(SocialLoginResponse { jw_token }))
}
