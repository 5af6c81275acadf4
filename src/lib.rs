use axum::{
    Router,
    extract::{FromRef, Request},
    http::HeaderName,
    middleware::{self, Next},
    response::Response,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Access control: identity resolution and the capability table.
pub mod auth;
pub mod policy;

// Persistence: the repository contract and its two backends.
pub mod memory;
pub mod repository;

pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod models;
pub mod seed;

// Routing split by audience (Public, Authenticated, Admin).
pub mod routes;
use auth::AuthUser;
use routes::{admin, authenticated, public};

// --- Public Re-exports ---

pub use config::AppConfig;
pub use memory::InMemoryRepository;
pub use repository::{PostgresRepository, RepositoryState};

/// ApiDoc
///
/// The OpenAPI document for every handler and schema, served at
/// `/api-docs/openapi.json` and browsable through `/swagger-ui`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::register, handlers::login, handlers::logout, handlers::get_me,
        handlers::get_dashboard, handlers::admin_dashboard, handlers::librarian_dashboard,
        handlers::member_dashboard,
        handlers::list_books, handlers::list_books_text, handlers::get_book,
        handlers::create_book, handlers::update_book, handlers::delete_book,
        handlers::list_authors, handlers::get_author, handlers::create_author,
        handlers::delete_author,
        handlers::list_libraries, handlers::get_library, handlers::create_library,
        handlers::delete_library, handlers::add_library_book, handlers::remove_library_book,
        handlers::assign_librarian,
        handlers::get_admin_site, handlers::list_users, handlers::update_user_role,
        handlers::get_permissions, handlers::get_admin_stats
    ),
    components(
        schemas(
            models::Author, models::Book, models::CoverKind, models::Library, models::Librarian,
            models::LibraryDetail, models::AuthorDetail, models::Account,
            models::CreateBookRequest, models::UpdateBookRequest, models::CreateAuthorRequest,
            models::CreateLibraryRequest, models::AssignLibrarianRequest,
            models::RegisterRequest, models::LoginRequest, models::LoginResponse,
            models::UpdateRoleRequest, models::AdminDashboardStats, models::Dashboard,
            policy::Role, policy::Capability, policy::RolePermissions,
            config::AdminSite, config::ModelAdmin,
        )
    ),
    tags(
        (name = "library-catalog", description = "Library catalog with role-based access control")
    )
)]
pub struct ApiDoc;

/// AppState
///
/// Shared, immutable container of the application's services and startup
/// configuration, cloned into every request.
#[derive(Clone)]
pub struct AppState {
    /// Persistence layer (Postgres or in-memory).
    pub repo: RepositoryState,
    /// Loaded configuration, including the admin site registry.
    pub config: AppConfig,
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// auth_middleware
///
/// Rejects unauthenticated requests before the handler runs. `AuthUser`
/// extraction failing short-circuits with 401.
async fn auth_middleware(_auth_user: AuthUser, request: Request, next: Next) -> Response {
    next.run(request).await
}

/// create_router
///
/// Assembles the routing table, the scoped auth middleware and the
/// observability layers around the shared state.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public::public_routes())
        // Write methods are merged onto the public read paths; only they carry
        // the auth layer.
        .merge(
            authenticated::authenticated_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                auth_middleware,
            )),
        )
        .nest(
            "/admin",
            admin::admin_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                auth_middleware,
            )),
        )
        .with_state(state);

    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Span for one HTTP request, correlated by the generated `x-request-id`.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
