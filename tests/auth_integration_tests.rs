use axum::{
    extract::FromRequestParts,
    http::{Method, Request, StatusCode, Uri, header, request::Parts},
};
use chrono::{Duration, Utc};
use library_catalog::{
    AppState, InMemoryRepository,
    auth::{self, AuthUser, Claims},
    config::{AppConfig, Env},
    models::{Account, NewIdentity},
    policy::Role,
    repository::Repository,
};
use jsonwebtoken::{EncodingKey, Header, encode};
use std::sync::Arc;
use uuid::Uuid;

// --- Helper Functions ---

const TEST_JWT_SECRET: &str = "test-secret-value-1234567890";

fn create_app_state(env: Env, repo: Arc<InMemoryRepository>) -> AppState {
    let mut config = AppConfig::default();
    config.env = env;
    config.jwt_secret = TEST_JWT_SECRET.to_string();

    AppState { repo, config }
}

async fn register(repo: &InMemoryRepository, username: &str) -> Account {
    let hash = auth::hash_password("password123").unwrap();
    repo.create_identity(NewIdentity::new(
        username,
        format!("{username}@library.com"),
        hash,
    ))
    .await
    .unwrap()
}

/// Helper to get the mutable Parts struct from a generated Request
fn get_request_parts(method: Method, uri: Uri) -> Parts {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap();
    let (parts, _) = request.into_parts();
    parts
}

fn with_bearer(parts: &mut Parts, token: &str) {
    parts.headers.insert(
        header::AUTHORIZATION,
        header::HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
    );
}

// --- Tests ---

#[tokio::test]
async fn test_auth_success_with_valid_session_token() {
    let repo = Arc::new(InMemoryRepository::new());
    let account = register(&repo, "reader").await;
    let app_state = create_app_state(Env::Production, repo.clone());

    let session = repo
        .create_session(account.id, auth::session_expiry(&app_state.config).unwrap())
        .await
        .unwrap();
    let token =
        auth::issue_token(&app_state.config, account.id, session.id, session.expires_at).unwrap();

    let mut parts = get_request_parts(Method::GET, "/".parse().unwrap());
    with_bearer(&mut parts, &token);

    let user = AuthUser::from_request_parts(&mut parts, &app_state)
        .await
        .unwrap();
    assert_eq!(user.id, account.id);
    assert_eq!(user.username, "reader");
    assert_eq!(user.role, Some(Role::Member));
    assert_eq!(user.session_id, Some(session.id));
}

#[tokio::test]
async fn test_auth_failure_with_missing_header() {
    let app_state = create_app_state(Env::Production, Arc::new(InMemoryRepository::new()));

    let mut parts = get_request_parts(Method::GET, "/".parse().unwrap());

    let auth_user = AuthUser::from_request_parts(&mut parts, &app_state).await;

    assert_eq!(
        auth_user.unwrap_err().status_code(),
        StatusCode::UNAUTHORIZED
    );
}

#[tokio::test]
async fn test_auth_failure_after_session_revoked() {
    let repo = Arc::new(InMemoryRepository::new());
    let account = register(&repo, "leaver").await;
    let app_state = create_app_state(Env::Production, repo.clone());

    let session = repo
        .create_session(account.id, auth::session_expiry(&app_state.config).unwrap())
        .await
        .unwrap();
    let token =
        auth::issue_token(&app_state.config, account.id, session.id, session.expires_at).unwrap();

    assert!(repo.delete_session(session.id).await.unwrap());

    let mut parts = get_request_parts(Method::GET, "/".parse().unwrap());
    with_bearer(&mut parts, &token);

    let auth_user = AuthUser::from_request_parts(&mut parts, &app_state).await;
    assert_eq!(
        auth_user.unwrap_err().status_code(),
        StatusCode::UNAUTHORIZED
    );
}

#[tokio::test]
async fn test_auth_failure_with_token_for_someone_elses_session() {
    let repo = Arc::new(InMemoryRepository::new());
    let owner = register(&repo, "owner").await;
    let intruder = register(&repo, "intruder").await;
    let app_state = create_app_state(Env::Production, repo.clone());

    let session = repo
        .create_session(owner.id, auth::session_expiry(&app_state.config).unwrap())
        .await
        .unwrap();
    // Validly signed, but `sub` does not own `sid`.
    let token =
        auth::issue_token(&app_state.config, intruder.id, session.id, session.expires_at).unwrap();

    let mut parts = get_request_parts(Method::GET, "/".parse().unwrap());
    with_bearer(&mut parts, &token);

    let auth_user = AuthUser::from_request_parts(&mut parts, &app_state).await;
    assert!(auth_user.is_err());
}

#[tokio::test]
async fn test_auth_failure_with_expired_jwt() {
    let repo = Arc::new(InMemoryRepository::new());
    let account = register(&repo, "late").await;
    let app_state = create_app_state(Env::Production, repo.clone());

    let session = repo
        .create_session(account.id, auth::session_expiry(&app_state.config).unwrap())
        .await
        .unwrap();

    // Well past the default 60s leeway.
    let past = Utc::now() - Duration::hours(2);
    let claims = Claims {
        sub: account.id,
        sid: session.id,
        iat: (past - Duration::hours(1)).timestamp() as usize,
        exp: past.timestamp() as usize,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
    )
    .unwrap();

    let mut parts = get_request_parts(Method::GET, "/".parse().unwrap());
    with_bearer(&mut parts, &token);

    let auth_user = AuthUser::from_request_parts(&mut parts, &app_state).await;
    assert_eq!(
        auth_user.unwrap_err().status_code(),
        StatusCode::UNAUTHORIZED
    );
}

#[tokio::test]
async fn test_auth_failure_with_wrong_secret() {
    let repo = Arc::new(InMemoryRepository::new());
    let account = register(&repo, "forger").await;
    let app_state = create_app_state(Env::Production, repo.clone());

    let session = repo
        .create_session(account.id, auth::session_expiry(&app_state.config).unwrap())
        .await
        .unwrap();

    let mut forged_config = AppConfig::default();
    forged_config.jwt_secret = "not-the-server-secret".to_string();
    let token =
        auth::issue_token(&forged_config, account.id, session.id, session.expires_at).unwrap();

    let mut parts = get_request_parts(Method::GET, "/".parse().unwrap());
    with_bearer(&mut parts, &token);

    assert!(
        AuthUser::from_request_parts(&mut parts, &app_state)
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_local_bypass_success() {
    let repo = Arc::new(InMemoryRepository::new());
    let account = register(&repo, "local_dev").await;
    repo.set_role(account.id, Role::Admin).await.unwrap();
    let app_state = create_app_state(Env::Local, repo);

    let mut parts = get_request_parts(Method::GET, "/".parse().unwrap());
    parts.headers.insert(
        header::HeaderName::from_static("x-user-id"),
        header::HeaderValue::from_str(&account.id.to_string()).unwrap(),
    );

    let user = AuthUser::from_request_parts(&mut parts, &app_state)
        .await
        .unwrap();
    assert_eq!(user.id, account.id);
    assert_eq!(user.role, Some(Role::Admin));
    assert_eq!(user.session_id, None);
}

#[tokio::test]
async fn test_local_bypass_with_unknown_user_is_rejected() {
    let app_state = create_app_state(Env::Local, Arc::new(InMemoryRepository::new()));

    let mut parts = get_request_parts(Method::GET, "/".parse().unwrap());
    parts.headers.insert(
        header::HeaderName::from_static("x-user-id"),
        header::HeaderValue::from_str(&Uuid::new_v4().to_string()).unwrap(),
    );

    let auth_user = AuthUser::from_request_parts(&mut parts, &app_state).await;
    assert_eq!(
        auth_user.unwrap_err().status_code(),
        StatusCode::UNAUTHORIZED
    );
}

#[tokio::test]
async fn test_local_bypass_disabled_in_prod() {
    let repo = Arc::new(InMemoryRepository::new());
    let account = register(&repo, "prod_user").await;
    let app_state = create_app_state(Env::Production, repo);

    let mut parts = get_request_parts(Method::GET, "/".parse().unwrap());
    // Provide ONLY the local bypass header
    parts.headers.insert(
        header::HeaderName::from_static("x-user-id"),
        header::HeaderValue::from_str(&account.id.to_string()).unwrap(),
    );

    let auth_user = AuthUser::from_request_parts(&mut parts, &app_state).await;

    assert_eq!(
        auth_user.unwrap_err().status_code(),
        StatusCode::UNAUTHORIZED
    );
}
