use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};

use authgate_api::app::services::AppServices;
use authgate_api::app::{AppState, build_app};
use authgate_auth::{Role, TokenIssuer, TokenIssuerConfig};
use authgate_core::{ProjectId, ProviderUid};
use authgate_infra::provider::memory::InMemoryBackend;
use authgate_infra::{InMemoryPrincipalStore, SessionManager};

const JWT_SECRET: &str = "test-secret";
const BASE: &str = "/v1/user/auth";

struct TestServer {
    base_url: String,
    backend: Arc<InMemoryBackend>,
    principals: Arc<InMemoryPrincipalStore>,
    sessions: Arc<SessionManager>,
    handle: tokio::task::JoinHandle<()>,
}

/// Same router as prod, wired to in-memory collaborators.
fn test_app(sessions: SessionManager, base_path: &str) -> (AppState, Arc<InMemoryPrincipalStore>) {
    let principals = Arc::new(InMemoryPrincipalStore::new());
    let issuer = TokenIssuer::new(&TokenIssuerConfig::new(
        JWT_SECRET,
        chrono::Duration::days(30),
    ));
    let state = AppState {
        services: Arc::new(AppServices::new(
            issuer,
            principals.clone(),
            Role::DEFAULT_SOCIAL,
        )),
        sessions: Arc::new(sessions),
        base_path: base_path.to_string(),
    };
    (state, principals)
}

impl TestServer {
    async fn spawn() -> Self {
        Self::spawn_with(InMemoryBackend::new(), BASE, true).await
    }

    async fn spawn_with(backend: InMemoryBackend, base_path: &str, cache_handles: bool) -> Self {
        let backend = Arc::new(backend);
        let sessions = SessionManager::new(backend.clone(), cache_handles);
        Self::spawn_with_sessions(backend, sessions, base_path).await
    }

    async fn spawn_with_sessions(backend: Arc<InMemoryBackend>, sessions: SessionManager, base_path: &str) -> Self {
        let (state, principals) = test_app(sessions, base_path);
        let sessions = state.sessions.clone();
        let app = build_app(state);

        // Ephemeral port.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}{base_path}"),
            backend,
            principals,
            sessions,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    id: String,
    iat: i64,
    exp: i64,
}

fn decode_jw_token(token: &str) -> Claims {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.required_spec_claims.clear();
    validation.required_spec_claims.insert("exp".to_string());
    jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(JWT_SECRET.as_bytes()),
        &validation,
    )
    .expect("jwToken should verify with the issuer key")
    .claims
}

async fn eventually(mut done: impl FnMut() -> bool) {
    for _ in 0..100 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(done(), "condition not reached in time");
}

fn project(id: &str) -> ProjectId {
    id.parse().unwrap()
}

async fn register(
    client: &reqwest::Client,
    srv: &TestServer,
    project_id: &str,
    body: Value,
) -> reqwest::Response {
    client
        .post(srv.url("/register"))
        .header("project-id", project_id)
        .json(&body)
        .send()
        .await
        .unwrap()
}

async fn register_user(client: &reqwest::Client, srv: &TestServer, project_id: &str, email: &str) -> ProviderUid {
    let res = register(
        client,
        srv,
        project_id,
        json!({ "name": "Test User", "email": email, "password": "password123" }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: Value = res.json().await.unwrap();
    body["user"]["uid"].as_str().unwrap().parse().unwrap()
}

#[tokio::test]
async fn health_needs_no_tenant() {
    let srv = TestServer::spawn().await;
    let addr = srv.base_url.trim_end_matches(BASE);

    let res = reqwest::get(format!("{addr}/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn register_then_login_yields_both_credentials() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = register(
        &client,
        &srv,
        "acme",
        json!({ "name": "Test User", "email": "test@example.com", "password": "password123" }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["message"], "User created");
    assert_eq!(body["user"]["email"], "test@example.com");
    assert_eq!(body["user"]["displayName"], "Test User");
    let uid = body["user"]["uid"].as_str().unwrap().to_string();
    assert!(!uid.is_empty());

    let id_token = srv
        .backend
        .sign_in(&project("acme"), "test@example.com", "password123")
        .unwrap();
    let res = client
        .post(srv.url("/login"))
        .header("project-id", "acme")
        .bearer_auth(&id_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body: Value = res.json().await.unwrap();
    let claims = decode_jw_token(body["jwToken"].as_str().unwrap());
    assert_eq!(claims.id, uid);
    assert_eq!(claims.exp - claims.iat, 30 * 24 * 60 * 60);
    assert!(!body["firebaseAuthToken"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn registered_uids_are_unique() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let a = register_user(&client, &srv, "acme", "a@example.com").await;
    let b = register_user(&client, &srv, "acme", "b@example.com").await;
    assert_ne!(a, b);
}

#[tokio::test]
async fn registration_input_is_validated() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = register(
        &client,
        &srv,
        "acme",
        json!({ "name": "", "email": "not-an-email", "password": "12345" }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let body: Value = res.json().await.unwrap();
    assert_eq!(body["message"], "Validation error");
    let params: Vec<&str> = body["errors"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["param"].as_str().unwrap())
        .collect();
    assert_eq!(params, ["name", "email", "password"]);
    assert!(body["errors"].as_array().unwrap().iter().all(|e| e["location"] == "body"));
    assert_eq!(srv.backend.mutation_count(&project("acme")), 0);
}

#[tokio::test]
async fn duplicate_email_is_a_conflict() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    register_user(&client, &srv, "acme", "dup@example.com").await;
    let res = register(
        &client,
        &srv,
        "acme",
        json!({ "name": "Other", "email": "dup@example.com", "password": "password123" }),
    )
    .await;

    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "email_exists");
}

#[tokio::test]
async fn missing_project_id_is_a_configuration_error() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/register"))
        .json(&json!({ "name": "Test User", "email": "t@example.com", "password": "password123" }))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "configuration_error");
    assert_eq!(srv.backend.initializations(), 0);
}

#[tokio::test]
async fn protected_routes_require_a_bearer_token_and_mutate_nothing() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    register_user(&client, &srv, "acme", "victim@example.com").await;
    let before = srv.backend.mutation_count(&project("acme"));

    for path in ["/login", "/update-user", "/updateUser", "/delete-user", "/deleteUser"] {
        let res = client
            .post(srv.url(path))
            .header("project-id", "acme")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED, "{path} without Authorization");

        let res = client
            .post(srv.url(path))
            .header("project-id", "acme")
            .header("Authorization", "Token abc")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED, "{path} with a non-Bearer scheme");
    }

    assert_eq!(srv.backend.mutation_count(&project("acme")), before);
    assert_eq!(srv.backend.user_count(&project("acme")), 1);
}

#[tokio::test]
async fn invalid_id_token_is_unauthorized() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/delete-user"))
        .header("project-id", "acme")
        .bearer_auth("idt.acme.forged")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "unauthorized");
}

#[tokio::test]
async fn deleting_twice_reports_user_not_found() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let uid = register_user(&client, &srv, "acme", "gone@example.com").await;
    let id_token = srv.backend.mint_id_token(&project("acme"), &uid).unwrap();

    let delete = || {
        client
            .post(srv.url("/delete-user"))
            .header("project-id", "acme")
            .bearer_auth(&id_token)
            .send()
    };

    let res = delete().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["message"], "User deleted successfully");
    assert!(srv.backend.user(&project("acme"), &uid).is_none());

    let res = delete().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "user_not_found");
}

#[tokio::test]
async fn update_user_sets_the_requested_email() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let uid = register_user(&client, &srv, "acme", "old@example.com").await;
    register_user(&client, &srv, "acme", "taken@example.com").await;
    let id_token = srv.backend.mint_id_token(&project("acme"), &uid).unwrap();

    let res = client
        .post(srv.url("/update-user"))
        .header("project-id", "acme")
        .bearer_auth(&id_token)
        .json(&json!({ "email": "new@example.com" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let user = srv.backend.user(&project("acme"), &uid).unwrap();
    assert_eq!(user.email.as_deref(), Some("new@example.com"));

    let res = client
        .post(srv.url("/updateUser"))
        .header("project-id", "acme")
        .bearer_auth(&id_token)
        .json(&json!({ "email": "taken@example.com" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let res = client
        .post(srv.url("/update-user"))
        .header("project-id", "acme")
        .bearer_auth(&id_token)
        .json(&json!({ "email": "nope" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn update_user_without_body_resyncs_from_the_token() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let uid = register_user(&client, &srv, "acme", "same@example.com").await;
    let id_token = srv.backend.mint_id_token(&project("acme"), &uid).unwrap();

    let res = client
        .post(srv.url("/update-user"))
        .header("project-id", "acme")
        .bearer_auth(&id_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["message"], "User updated successfully");
}

#[tokio::test]
async fn concurrent_tenants_do_not_see_each_other() {
    let backend = InMemoryBackend::new().with_latency(Duration::from_millis(20));
    let srv = TestServer::spawn_with(backend, BASE, false).await;
    let client = reqwest::Client::new();

    let body = json!({ "name": "Test User", "email": "same@example.com", "password": "password123" });
    let (a, b) = tokio::join!(
        register(&client, &srv, "tenant-a", body.clone()),
        register(&client, &srv, "tenant-b", body.clone()),
    );
    assert_eq!(a.status(), StatusCode::CREATED);
    assert_eq!(b.status(), StatusCode::CREATED);
    assert_eq!(srv.backend.user_count(&project("tenant-a")), 1);
    assert_eq!(srv.backend.user_count(&project("tenant-b")), 1);

    // A token minted for tenant-a does not verify against tenant-b.
    let id_token = srv
        .backend
        .sign_in(&project("tenant-a"), "same@example.com", "password123")
        .unwrap();
    let (own, other) = tokio::join!(
        client
            .post(srv.url("/login"))
            .header("project-id", "tenant-a")
            .bearer_auth(&id_token)
            .send(),
        client
            .post(srv.url("/login"))
            .header("project-id", "tenant-b")
            .bearer_auth(&id_token)
            .send(),
    );
    assert_eq!(own.unwrap().status(), StatusCode::OK);
    assert_eq!(other.unwrap().status(), StatusCode::UNAUTHORIZED);

    // Without handle caching every session was torn down with its request.
    eventually(|| srv.backend.initializations() == srv.backend.shutdowns()).await;
    assert_eq!(srv.sessions.open_handles(), 0);
}

#[tokio::test]
async fn provider_init_failure_is_scoped_to_the_request() {
    let backend = InMemoryBackend::new();
    backend.fail_initialization_for(&project("broken"));
    let srv = TestServer::spawn_with(backend, BASE, true).await;
    let client = reqwest::Client::new();

    let res = register(
        &client,
        &srv,
        "broken",
        json!({ "name": "Test User", "email": "t@example.com", "password": "password123" }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "provider_unavailable");

    // The process keeps serving other tenants.
    register_user(&client, &srv, "healthy", "t@example.com").await;
}

#[tokio::test]
async fn social_login_creates_the_local_principal_once() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let uid = srv
        .backend
        .seed_user(&project("acme"), "social@example.com", Some("Social User"));
    let id_token = srv.backend.mint_id_token(&project("acme"), &uid).unwrap();

    let login = || {
        client
            .post(srv.url("/social-login"))
            .header("project-id", "acme")
            .json(&json!({ "idToken": id_token }))
            .send()
    };

    let first: Value = login().await.unwrap().json().await.unwrap();
    let second: Value = login().await.unwrap().json().await.unwrap();

    let first = decode_jw_token(first["jwToken"].as_str().unwrap());
    let second = decode_jw_token(second["jwToken"].as_str().unwrap());
    assert_eq!(first.id, second.id);
    assert_ne!(first.id, uid.as_str());
    assert_eq!(srv.principals.len(), 1);
}

#[tokio::test]
async fn social_login_requires_an_id_token() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/social-login"))
        .header("project-id", "acme")
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["errors"][0]["param"], "idToken");

    let res = client
        .post(srv.url("/social-login"))
        .header("project-id", "acme")
        .json(&json!({ "idToken": "idt.acme.unknown" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert!(srv.principals.is_empty());
}

#[tokio::test]
async fn routes_can_be_mounted_at_the_root() {
    let srv = TestServer::spawn_with(InMemoryBackend::new(), "", true).await;
    let client = reqwest::Client::new();

    register_user(&client, &srv, "acme", "root@example.com").await;
    let res = client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn a_request_dropped_mid_flight_releases_its_provider_handle() {
    use axum::body::Body;
    use tower::ServiceExt;

    let backend = Arc::new(InMemoryBackend::new().with_latency(Duration::from_millis(200)));
    let (state, _) = test_app(SessionManager::new(backend.clone(), false), BASE);
    let sessions = state.sessions.clone();

    let req = axum::http::Request::builder()
        .method("POST")
        .uri(format!("{BASE}/register"))
        .header("project-id", "acme")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({ "name": "Test User", "email": "slow@example.com", "password": "password123" }).to_string(),
        ))
        .unwrap();

    let outcome = tokio::time::timeout(Duration::from_millis(50), build_app(state).oneshot(req)).await;
    assert!(outcome.is_err(), "request should still be waiting on the provider");

    assert_eq!(sessions.leases(&project("acme")), 0);
    assert_eq!(sessions.open_handles(), 0);
    eventually(|| backend.shutdowns() == backend.initializations()).await;
    assert_eq!(backend.initializations(), 1);
}

#[tokio::test]
async fn idle_provider_handles_stay_bounded_across_many_tenants() {
    let backend = Arc::new(InMemoryBackend::new());
    let sessions = SessionManager::with_limits(backend.clone(), true, 4);
    let srv = TestServer::spawn_with_sessions(backend, sessions, BASE).await;
    let client = reqwest::Client::new();

    for i in 0..40 {
        let res = client
            .post(srv.url("/login"))
            .header("project-id", format!("tenant-{i}"))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    eventually(|| srv.sessions.open_handles() <= 4).await;
    eventually(|| srv.backend.shutdowns() == srv.backend.initializations() - srv.sessions.open_handles()).await;
    assert_eq!(srv.backend.initializations(), 40);
}

#[tokio::test]
async fn update_user_checks_the_token_before_the_body() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/update-user"))
        .header("project-id", "acme")
        .bearer_auth("not-a-real-token")
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "unauthorized");
}
