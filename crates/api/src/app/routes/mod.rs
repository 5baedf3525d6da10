use axum::{Router, routing::post};

pub mod auth;
pub mod system;

/// Authentication routes, relative to the configured base path.
///
/// `login`, `update-user` and `delete-user` require a Bearer provider ID
/// token; the camelCase paths are kept as aliases for existing clients.
pub fn router() -> Router {
    let protected = Router::new()
        .route("/login", post(auth::login))
        .route("/update-user", post(auth::update_user))
        .route("/updateUser", post(auth::update_user))
        .route("/delete-user", post(auth::delete_user))
        .route("/deleteUser", post(auth::delete_user))
        .route_layer(axum::middleware::from_fn(crate::middleware::bearer_middleware));

    Router::new()
        .route("/register", post(auth::register))
        .route("/social-login", post(auth::social_login))
        .merge(protected)
}
