use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Read-only catalog endpoints plus registration and login. Nothing here
/// requires an identity; write methods on the same paths live in
/// `authenticated` and are merged onto these routes.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Liveness probe for load balancers.
        .route("/health", get(|| async { "ok" }))
        // POST /register
        // Creates an identity with the Member role.
        .route("/register", post(handlers::register))
        // POST /login
        // Issues a bearer token backed by a server-side session.
        .route("/login", post(handlers::login))
        // GET /books?publication_year=&author_id=&search=&ordering=&limit=&offset=
        .route("/books", get(handlers::list_books))
        // GET /books/text
        // Plain-text rendering of the same listing.
        .route("/books/text", get(handlers::list_books_text))
        .route("/books/{id}", get(handlers::get_book))
        .route("/authors", get(handlers::list_authors))
        // GET /authors/{id}
        // The author with all of their books.
        .route("/authors/{id}", get(handlers::get_author))
        .route("/libraries", get(handlers::list_libraries))
        // GET /libraries/{id}
        // Holdings, book count and the assigned librarian.
        .route("/libraries/{id}", get(handlers::get_library))
}
