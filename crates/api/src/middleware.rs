use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};

use authgate_infra::SessionManager;

use crate::app::errors::ApiError;
use crate::context::{BearerToken, TenantContext};

pub const PROJECT_ID_HEADER: &str = "project-id";

/// Open a provider session for the request's `project-id`, attach it and the
/// tenant context to the request, and release it once the handler has
/// produced a response (error responses included). If the request future is
/// dropped first, dropping the session returns its lease.
pub async fn session_middleware(
    State(sessions): State<Arc<SessionManager>>,
    mut req: Request,
    next: Next,
) -> Response {
    let header = match req.headers().get(PROJECT_ID_HEADER) {
        Some(value) => match value.to_str() {
            Ok(v) => Some(v.to_owned()),
            Err(_) => {
                return ApiError::Configuration("project-id header is not valid UTF-8".into())
                    .into_response();
            }
        },
        None => None,
    };

    let session = match sessions.open(header.as_deref()).await {
        Ok(session) => session,
        Err(e) => return ApiError::from(e).into_response(),
    };

    req.extensions_mut()
        .insert(TenantContext::new(session.project_id().clone()));
    req.extensions_mut().insert(session.clone());

    let response = next.run(req).await;

    sessions.close(session).await;
    response
}

/// Require `Authorization: Bearer <token>` and attach the token.
pub async fn bearer_middleware(mut req: Request, next: Next) -> Result<Response, ApiError> {
    let token = extract_bearer(req.headers())?;
    let token = BearerToken::new(token);
    req.extensions_mut().insert(token);

    Ok(next.run(req).await)
}

fn extract_bearer(headers: &HeaderMap) -> Result<&str, ApiError> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or_else(|| ApiError::unauthorized("missing Authorization header"))?;

    let header = header
        .to_str()
        .map_err(|_| ApiError::unauthorized("Authorization header is not valid UTF-8"))?;

    let header = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::unauthorized("expected a Bearer token"))?;

    let token = header.trim();
    if token.is_empty() {
        return Err(ApiError::unauthorized("empty Bearer token"));
    }

    Ok(token)
}
