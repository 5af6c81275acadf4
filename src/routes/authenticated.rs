use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{delete, get, post, put},
};

/// Authenticated Router Module
///
/// Every handler here receives a validated `AuthUser`. Anonymous callers are
/// turned away with 401 by the middleware layered on this router; the
/// handlers then check the caller's capability (403 on deny).
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // --- Session & Identity ---
        // POST /logout
        // Deletes the session the token is bound to.
        .route("/logout", post(handlers::logout))
        .route("/me", get(handlers::get_me))
        // --- Dashboards ---
        // GET /dashboard needs the view capability; the role dashboards need
        // the exact role.
        .route("/dashboard", get(handlers::get_dashboard))
        .route("/dashboard/admin", get(handlers::admin_dashboard))
        .route("/dashboard/librarian", get(handlers::librarian_dashboard))
        .route("/dashboard/member", get(handlers::member_dashboard))
        // --- Books ---
        // POST (add), PUT (change), DELETE (delete).
        .route("/books", post(handlers::create_book))
        .route(
            "/books/{id}",
            put(handlers::update_book).delete(handlers::delete_book),
        )
        // --- Authors ---
        .route("/authors", post(handlers::create_author))
        .route("/authors/{id}", delete(handlers::delete_author))
        // --- Libraries ---
        .route("/libraries", post(handlers::create_library))
        .route("/libraries/{id}", delete(handlers::delete_library))
        // PUT/DELETE /libraries/{id}/books/{book_id}
        // Adds a book to, or removes it from, a library's holdings.
        .route(
            "/libraries/{id}/books/{book_id}",
            put(handlers::add_library_book).delete(handlers::remove_library_book),
        )
        // PUT /libraries/{id}/librarian
        // Assigns (or renames) the library's single librarian.
        .route("/libraries/{id}/librarian", put(handlers::assign_librarian))
}
