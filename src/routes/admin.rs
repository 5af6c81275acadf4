use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, put},
};

/// Admin Router Module
///
/// Nested under `/admin`. Requests pass the authentication layer first; each
/// handler then requires the Admin role exactly, so Librarians and Members
/// get 403.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // GET /admin/site
        // Site header/titles and the registered models' list configuration.
        .route("/site", get(handlers::get_admin_site))
        // GET /admin/users?role=Librarian
        .route("/users", get(handlers::list_users))
        // PUT /admin/users/{id}/role
        // Moves one user into Admin, Librarian or Member.
        .route("/users/{id}/role", put(handlers::update_user_role))
        // GET /admin/permissions
        // Role -> permission codenames, as consulted by the policy.
        .route("/permissions", get(handlers::get_permissions))
        // GET /admin/stats
        .route("/stats", get(handlers::get_admin_stats))
}
