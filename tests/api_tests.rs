use library_catalog::{
    AppConfig, AppState, InMemoryRepository, create_router,
    models::{Account, Author, Book, LoginResponse},
    policy::Role,
    repository::{Repository, RepositoryState},
    seed,
};
use reqwest::StatusCode;
use std::sync::Arc;
use tokio::net::TcpListener;

pub struct TestApp {
    pub address: String,
    pub repo: RepositoryState,
}

async fn spawn_app() -> TestApp {
    let repo = Arc::new(InMemoryRepository::new()) as RepositoryState;
    seed::seed_demo_data(repo.as_ref())
        .await
        .expect("Failed to seed demo data");

    let state = AppState {
        repo: repo.clone(),
        config: AppConfig::default(),
    };
    let router = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestApp { address, repo }
}

async fn login(client: &reqwest::Client, app: &TestApp, username: &str, password: &str) -> String {
    let response = client
        .post(format!("{}/login", app.address))
        .json(&serde_json::json!({ "username": username, "password": password }))
        .send()
        .await
        .expect("login request failed");
    assert_eq!(response.status(), StatusCode::OK);
    let body: LoginResponse = response.json().await.unwrap();
    assert_eq!(body.token_type, "Bearer");
    body.token
}

#[tokio::test]
async fn test_health_check() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let response = client
        .get(format!("{}/health", app.address))
        .send()
        .await
        .expect("req fail");
    assert!(response.status().is_success());
}

#[tokio::test]
async fn test_login_logout_lifecycle() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let token = login(&client, &app, "librarian_user", "librarian123").await;

    let me = client
        .get(format!("{}/me", app.address))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(me.status(), StatusCode::OK);
    let account: Account = me.json().await.unwrap();
    assert_eq!(account.role, Some(Role::Librarian));

    let logout = client
        .post(format!("{}/logout", app.address))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(logout.status(), StatusCode::NO_CONTENT);

    // Same token, revoked session.
    let after = client
        .get(format!("{}/me", app.address))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(after.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_wrong_password_and_unknown_user_look_the_same() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let mut bodies = Vec::new();
    for (username, password) in [("member_user", "not-it"), ("nobody", "member123")] {
        let response = client
            .post(format!("{}/login", app.address))
            .json(&serde_json::json!({ "username": username, "password": password }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        bodies.push(response.json::<serde_json::Value>().await.unwrap());
    }
    assert_eq!(bodies[0], bodies[1]);
    assert_eq!(bodies[0]["error"]["code"], "invalid_credentials");
}

#[tokio::test]
async fn test_register_then_login_as_member() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/register", app.address))
        .json(&serde_json::json!({
            "username": "new_member",
            "email": "new_member@library.com",
            "password": "a-long-password"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let token = login(&client, &app, "new_member", "a-long-password").await;

    let authors: Vec<Author> = client
        .get(format!("{}/authors", app.address))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let rowling = authors.iter().find(|a| a.name == "J.K. Rowling").unwrap();

    let denied = client
        .post(format!("{}/books", app.address))
        .bearer_auth(&token)
        .json(&serde_json::json!({
            "title": "Harry Potter and the Prisoner of Azkaban",
            "publication_year": 1999,
            "author_id": rowling.id
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_short_password_is_rejected() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/register", app.address))
        .json(&serde_json::json!({
            "username": "shorty",
            "email": "shorty@library.com",
            "password": "short"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"]["fields"]["password"].is_array());
}

#[tokio::test]
async fn test_admin_deletes_book_and_listing_shrinks() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let books: Vec<Book> = client
        .get(format!("{}/books", app.address))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(books.len(), 5);
    let target = books.last().unwrap().id;

    let librarian = login(&client, &app, "librarian_user", "librarian123").await;
    let forbidden = client
        .delete(format!("{}/books/{}", app.address, target))
        .bearer_auth(&librarian)
        .send()
        .await
        .unwrap();
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

    let admin = login(&client, &app, "admin_user", "admin123").await;
    let deleted = client
        .delete(format!("{}/books/{}", app.address, target))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let after: Vec<Book> = client
        .get(format!("{}/books", app.address))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(after.len(), 4);
    assert_eq!(app.repo.get_stats().await.unwrap().total_books, 4);
}

#[tokio::test]
async fn test_text_listing_is_plain_text() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/books/text?search=orwell", app.address))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/plain"));
    assert_eq!(
        response.text().await.unwrap(),
        "1984 by George Orwell\nAnimal Farm by George Orwell"
    );
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let doc: serde_json::Value = client
        .get(format!("{}/api-docs/openapi.json", app.address))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(doc["paths"]["/books"].is_object());
    assert!(doc["paths"]["/admin/users/{id}/role"].is_object());
}
