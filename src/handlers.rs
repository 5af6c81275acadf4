use crate::{
    AppState,
    auth::{self, AuthUser},
    config::AdminSite,
    error::{ApiError, ApiResult},
    extract::{Json, Path, Query},
    models::{
        Account, AdminDashboardStats, AssignLibrarianRequest, Author, AuthorDetail, Book,
        BookFilter, BookOrdering, CreateAuthorRequest, CreateBookRequest, CreateLibraryRequest,
        Dashboard, Librarian, Library, LibraryDetail, LoginRequest, LoginResponse, NewIdentity,
        RegisterRequest, UpdateBookRequest, UpdateRoleRequest,
    },
    policy::{self, Capability, Role, RolePermissions},
};
use axum::{extract::State, http::StatusCode};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

/// Hard ceiling on `limit` for list endpoints.
pub const MAX_PAGE_SIZE: i64 = 100;

// --- Query Structs ---

/// BookListParams
///
/// Accepted query parameters of GET /books and GET /books/text.
#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct BookListParams {
    /// Exact publication year.
    pub publication_year: Option<i32>,
    pub author_id: Option<i64>,
    /// Exact title.
    pub title: Option<String>,
    pub is_available: Option<bool>,
    pub language: Option<String>,
    /// Case-insensitive substring matched against the title or the author's name.
    pub search: Option<String>,
    /// `title`, `publication_year`, `author` or `id`; prefix with `-` for descending.
    pub ordering: Option<String>,
    /// Page size, at most 100. Defaults to the configured page size.
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl BookListParams {
    /// Resolves the raw parameters into repository criteria. An unknown
    /// ordering field is a client error rather than being silently ignored.
    pub fn into_filter(self, default_limit: i64) -> ApiResult<BookFilter> {
        let ordering = match self.ordering.as_deref() {
            None | Some("") => BookOrdering::default(),
            Some(raw) => BookOrdering::parse(raw).ok_or_else(|| {
                ApiError::InvalidQueryParam(format!("unknown ordering field '{raw}'"))
            })?,
        };

        Ok(BookFilter {
            publication_year: self.publication_year,
            author_id: self.author_id,
            title: self.title,
            is_available: self.is_available,
            language: self.language,
            search: self.search.filter(|s| !s.trim().is_empty()),
            ordering,
            limit: self.limit.unwrap_or(default_limit).clamp(1, MAX_PAGE_SIZE),
            offset: self.offset.unwrap_or(0).max(0),
        })
    }
}

/// UserListParams
#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UserListParams {
    /// Only accounts holding this role.
    pub role: Option<Role>,
}

/// Every book of one author, in title order.
fn books_by_author(author_id: i64) -> BookFilter {
    BookFilter {
        author_id: Some(author_id),
        limit: i64::MAX,
        ..Default::default()
    }
}

// --- Identity Handlers ---

/// register
///
/// [Public Route] Creates an identity and its profile in one unit of work.
/// New accounts always start with role Member; promotion happens through the
/// admin surface.
#[utoipa::path(
    post,
    path = "/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Registered", body = Account),
        (status = 400, description = "Invalid fields"),
        (status = 409, description = "Username taken")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<Account>)> {
    payload.validate()?;

    let password_hash = auth::hash_password(&payload.password)?;
    let account = state
        .repo
        .create_identity(NewIdentity {
            username: payload.username,
            email: payload.email,
            password_hash,
            date_of_birth: payload.date_of_birth,
            profile_photo: payload.profile_photo,
        })
        .await?;

    tracing::info!(user_id = %account.id, username = %account.username, "identity registered");
    Ok((StatusCode::CREATED, Json(account)))
}

/// login
///
/// [Public Route] Exchanges a username and password for a bearer token bound
/// to a fresh server-side session. An unknown username and a wrong password
/// produce the same response.
#[utoipa::path(
    post,
    path = "/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = LoginResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let user = state
        .repo
        .find_user_by_username(&payload.username)
        .await?
        .filter(|user| auth::verify_password(&payload.password, &user.password_hash))
        .ok_or(ApiError::InvalidCredentials)?;

    let account = state
        .repo
        .get_account(user.id)
        .await?
        .ok_or(ApiError::InvalidCredentials)?;

    let expires_at = auth::session_expiry(&state.config)?;
    let session = state.repo.create_session(user.id, expires_at).await?;
    let token = auth::issue_token(&state.config, user.id, session.id, session.expires_at)?;

    tracing::info!(user_id = %user.id, session_id = %session.id, "login succeeded");
    Ok(Json(LoginResponse {
        token,
        token_type: "Bearer".to_string(),
        expires_at: session.expires_at,
        account,
    }))
}

/// logout
///
/// [Authenticated Route] Revokes the session backing the presented token.
/// Tokens referring to a revoked session are rejected from then on.
#[utoipa::path(
    post,
    path = "/logout",
    responses((status = 204, description = "Logged out"), (status = 401, description = "Not logged in"))
)]
pub async fn logout(user: AuthUser, State(state): State<AppState>) -> ApiResult<StatusCode> {
    if let Some(session_id) = user.session_id {
        state.repo.delete_session(session_id).await?;
        tracing::info!(user_id = %user.id, %session_id, "session revoked");
    }
    Ok(StatusCode::NO_CONTENT)
}

/// get_me
///
/// [Authenticated Route] The caller's account, including its role.
#[utoipa::path(
    get,
    path = "/me",
    responses((status = 200, description = "Account", body = Account))
)]
pub async fn get_me(
    AuthUser { id, .. }: AuthUser,
    State(state): State<AppState>,
) -> ApiResult<Json<Account>> {
    state
        .repo
        .get_account(id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("Account"))
}

// --- Dashboards ---

fn dashboard_for(user: AuthUser) -> Json<Dashboard> {
    let capabilities = user.role.map(policy::granted).unwrap_or(&[]).to_vec();
    Json(Dashboard {
        username: user.username,
        role: user.role,
        capabilities,
    })
}

/// get_dashboard
///
/// [Authenticated Route] Requires the view capability; reports what the
/// caller may do with the catalog.
#[utoipa::path(
    get,
    path = "/dashboard",
    responses(
        (status = 200, description = "Dashboard", body = Dashboard),
        (status = 403, description = "No role")
    )
)]
pub async fn get_dashboard(user: AuthUser) -> ApiResult<Json<Dashboard>> {
    policy::authorize(&user, Capability::View)?;
    Ok(dashboard_for(user))
}

/// admin_dashboard
#[utoipa::path(
    get,
    path = "/dashboard/admin",
    responses((status = 200, description = "Admin dashboard", body = Dashboard), (status = 403, description = "Not an Admin"))
)]
pub async fn admin_dashboard(user: AuthUser) -> ApiResult<Json<Dashboard>> {
    policy::require_role(&user, Role::Admin)?;
    Ok(dashboard_for(user))
}

/// librarian_dashboard
#[utoipa::path(
    get,
    path = "/dashboard/librarian",
    responses((status = 200, description = "Librarian dashboard", body = Dashboard), (status = 403, description = "Not a Librarian"))
)]
pub async fn librarian_dashboard(user: AuthUser) -> ApiResult<Json<Dashboard>> {
    policy::require_role(&user, Role::Librarian)?;
    Ok(dashboard_for(user))
}

/// member_dashboard
#[utoipa::path(
    get,
    path = "/dashboard/member",
    responses((status = 200, description = "Member dashboard", body = Dashboard), (status = 403, description = "Not a Member"))
)]
pub async fn member_dashboard(user: AuthUser) -> ApiResult<Json<Dashboard>> {
    policy::require_role(&user, Role::Member)?;
    Ok(dashboard_for(user))
}

// --- Book Handlers ---

/// list_books
///
/// [Public Route] Lists books with exact filters, free-text search, ordering
/// and a page window.
#[utoipa::path(
    get,
    path = "/books",
    params(BookListParams),
    responses(
        (status = 200, description = "Filtered books", body = [Book]),
        (status = 400, description = "Unknown ordering field")
    )
)]
pub async fn list_books(
    State(state): State<AppState>,
    Query(params): Query<BookListParams>,
) -> ApiResult<Json<Vec<Book>>> {
    let filter = params.into_filter(state.config.page_size)?;
    Ok(Json(state.repo.list_books(&filter).await?))
}

/// list_books_text
///
/// [Public Route] The same listing rendered as plain text, one
/// `"{title} by {author}"` line per book.
#[utoipa::path(
    get,
    path = "/books/text",
    params(BookListParams),
    responses((status = 200, description = "One line per book", body = String, content_type = "text/plain"))
)]
pub async fn list_books_text(
    State(state): State<AppState>,
    Query(params): Query<BookListParams>,
) -> ApiResult<String> {
    let filter = params.into_filter(state.config.page_size)?;
    let books = state.repo.list_books(&filter).await?;
    Ok(books
        .iter()
        .map(|b| format!("{} by {}", b.title, b.author_name))
        .collect::<Vec<_>>()
        .join("\n"))
}

/// get_book
#[utoipa::path(
    get,
    path = "/books/{id}",
    params(("id" = i64, Path, description = "Book ID")),
    responses((status = 200, description = "Found", body = Book), (status = 404, description = "Not Found"))
)]
pub async fn get_book(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Book>> {
    state
        .repo
        .get_book(id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("Book"))
}

/// create_book
///
/// [Authenticated Route] Requires the add capability (Admin, Librarian).
/// The referenced author must exist and a present ISBN must be unused.
#[utoipa::path(
    post,
    path = "/books",
    request_body = CreateBookRequest,
    responses(
        (status = 201, description = "Created", body = Book),
        (status = 400, description = "Invalid fields or unknown author"),
        (status = 403, description = "Missing add capability"),
        (status = 409, description = "Duplicate ISBN")
    )
)]
pub async fn create_book(
    user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateBookRequest>,
) -> ApiResult<(StatusCode, Json<Book>)> {
    policy::authorize(&user, Capability::Add)?;
    payload.check()?;

    let book = state.repo.create_book(payload).await?;
    tracing::info!(book_id = book.id, user_id = %user.id, "book created");
    Ok((StatusCode::CREATED, Json(book)))
}

/// update_book
///
/// [Authenticated Route] Partial update; requires the change capability.
#[utoipa::path(
    put,
    path = "/books/{id}",
    params(("id" = i64, Path, description = "Book ID")),
    request_body = UpdateBookRequest,
    responses(
        (status = 200, description = "Updated", body = Book),
        (status = 403, description = "Missing change capability"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn update_book(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateBookRequest>,
) -> ApiResult<Json<Book>> {
    policy::authorize(&user, Capability::Change)?;
    payload.check()?;

    match state.repo.update_book(id, payload).await? {
        Some(book) => {
            tracing::info!(book_id = id, user_id = %user.id, "book updated");
            Ok(Json(book))
        }
        None => Err(ApiError::NotFound("Book")),
    }
}

/// delete_book
///
/// [Authenticated Route] Requires the delete capability, which only Admins hold.
/// Removing a book also removes it from every library.
#[utoipa::path(
    delete,
    path = "/books/{id}",
    params(("id" = i64, Path, description = "Book ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Missing delete capability"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_book(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    policy::authorize(&user, Capability::Delete)?;
    if state.repo.delete_book(id).await? {
        tracing::info!(book_id = id, user_id = %user.id, "book deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("Book"))
    }
}

// --- Author Handlers ---

/// list_authors
#[utoipa::path(
    get,
    path = "/authors",
    responses((status = 200, description = "Authors by name", body = [Author]))
)]
pub async fn list_authors(State(state): State<AppState>) -> ApiResult<Json<Vec<Author>>> {
    Ok(Json(state.repo.list_authors().await?))
}

/// get_author
///
/// [Public Route] An author together with every book they wrote.
#[utoipa::path(
    get,
    path = "/authors/{id}",
    params(("id" = i64, Path, description = "Author ID")),
    responses((status = 200, description = "Found", body = AuthorDetail), (status = 404, description = "Not Found"))
)]
pub async fn get_author(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<AuthorDetail>> {
    let author = state
        .repo
        .get_author(id)
        .await?
        .ok_or(ApiError::NotFound("Author"))?;
    let books = state.repo.list_books(&books_by_author(id)).await?;
    Ok(Json(AuthorDetail {
        author,
        book_count: books.len(),
        books,
    }))
}

/// create_author
#[utoipa::path(
    post,
    path = "/authors",
    request_body = CreateAuthorRequest,
    responses((status = 201, description = "Created", body = Author), (status = 403, description = "Missing add capability"))
)]
pub async fn create_author(
    user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateAuthorRequest>,
) -> ApiResult<(StatusCode, Json<Author>)> {
    policy::authorize(&user, Capability::Add)?;
    payload.validate()?;
    let author = state.repo.create_author(payload.name).await?;
    Ok((StatusCode::CREATED, Json(author)))
}

/// delete_author
///
/// [Authenticated Route] Admin only. Cascades to the author's books.
#[utoipa::path(
    delete,
    path = "/authors/{id}",
    params(("id" = i64, Path, description = "Author ID")),
    responses((status = 204, description = "Deleted"), (status = 404, description = "Not Found"))
)]
pub async fn delete_author(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    policy::authorize(&user, Capability::Delete)?;
    if state.repo.delete_author(id).await? {
        tracing::info!(author_id = id, user_id = %user.id, "author deleted with their books");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("Author"))
    }
}

// --- Library Handlers ---

/// list_libraries
#[utoipa::path(
    get,
    path = "/libraries",
    responses((status = 200, description = "Libraries by name", body = [Library]))
)]
pub async fn list_libraries(State(state): State<AppState>) -> ApiResult<Json<Vec<Library>>> {
    Ok(Json(state.repo.list_libraries().await?))
}

/// get_library
///
/// [Public Route] A library with its holdings, their count and its librarian
/// (if one is assigned).
#[utoipa::path(
    get,
    path = "/libraries/{id}",
    params(("id" = i64, Path, description = "Library ID")),
    responses((status = 200, description = "Found", body = LibraryDetail), (status = 404, description = "Not Found"))
)]
pub async fn get_library(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<LibraryDetail>> {
    let library = state
        .repo
        .get_library(id)
        .await?
        .ok_or(ApiError::NotFound("Library"))?;
    let books = state.repo.library_books(id).await?;
    let librarian = state.repo.get_librarian(id).await?;
    Ok(Json(LibraryDetail {
        library,
        librarian,
        book_count: books.len(),
        books,
    }))
}

/// create_library
#[utoipa::path(
    post,
    path = "/libraries",
    request_body = CreateLibraryRequest,
    responses((status = 201, description = "Created", body = Library), (status = 403, description = "Missing add capability"))
)]
pub async fn create_library(
    user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateLibraryRequest>,
) -> ApiResult<(StatusCode, Json<Library>)> {
    policy::authorize(&user, Capability::Add)?;
    payload.validate()?;
    let library = state.repo.create_library(payload).await?;
    Ok((StatusCode::CREATED, Json(library)))
}

/// delete_library
///
/// [Authenticated Route] Admin only. Removes the librarian and the holdings,
/// never the books themselves.
#[utoipa::path(
    delete,
    path = "/libraries/{id}",
    params(("id" = i64, Path, description = "Library ID")),
    responses((status = 204, description = "Deleted"), (status = 404, description = "Not Found"))
)]
pub async fn delete_library(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    policy::authorize(&user, Capability::Delete)?;
    if state.repo.delete_library(id).await? {
        tracing::info!(library_id = id, user_id = %user.id, "library deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("Library"))
    }
}

/// add_library_book
///
/// [Authenticated Route] Puts a book on a library's shelf. Idempotent.
#[utoipa::path(
    put,
    path = "/libraries/{id}/books/{book_id}",
    params(
        ("id" = i64, Path, description = "Library ID"),
        ("book_id" = i64, Path, description = "Book ID")
    ),
    responses((status = 204, description = "Held"), (status = 404, description = "Library or book not found"))
)]
pub async fn add_library_book(
    user: AuthUser,
    State(state): State<AppState>,
    Path((id, book_id)): Path<(i64, i64)>,
) -> ApiResult<StatusCode> {
    policy::authorize(&user, Capability::Change)?;
    if state.repo.get_library(id).await?.is_none() {
        return Err(ApiError::NotFound("Library"));
    }
    if state.repo.get_book(book_id).await?.is_none() {
        return Err(ApiError::NotFound("Book"));
    }
    state.repo.add_library_book(id, book_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// remove_library_book
#[utoipa::path(
    delete,
    path = "/libraries/{id}/books/{book_id}",
    params(
        ("id" = i64, Path, description = "Library ID"),
        ("book_id" = i64, Path, description = "Book ID")
    ),
    responses((status = 204, description = "Removed"), (status = 404, description = "Not held"))
)]
pub async fn remove_library_book(
    user: AuthUser,
    State(state): State<AppState>,
    Path((id, book_id)): Path<(i64, i64)>,
) -> ApiResult<StatusCode> {
    policy::authorize(&user, Capability::Change)?;
    if state.repo.remove_library_book(id, book_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("Holding"))
    }
}

/// assign_librarian
///
/// [Authenticated Route] Sets the librarian of a library, replacing the name
/// of the current one if a librarian is already assigned.
#[utoipa::path(
    put,
    path = "/libraries/{id}/librarian",
    params(("id" = i64, Path, description = "Library ID")),
    request_body = AssignLibrarianRequest,
    responses((status = 200, description = "Assigned", body = Librarian), (status = 404, description = "Library not found"))
)]
pub async fn assign_librarian(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<AssignLibrarianRequest>,
) -> ApiResult<Json<Librarian>> {
    policy::authorize(&user, Capability::Change)?;
    payload.validate()?;
    if state.repo.get_library(id).await?.is_none() {
        return Err(ApiError::NotFound("Library"));
    }
    Ok(Json(state.repo.assign_librarian(id, payload.name).await?))
}

// --- Admin Handlers ---

/// get_admin_site
///
/// [Admin Route] Site metadata and the registered models with their list
/// columns, filters, search fields, ordering and page size.
#[utoipa::path(
    get,
    path = "/admin/site",
    responses((status = 200, description = "Admin site", body = AdminSite))
)]
pub async fn get_admin_site(
    user: AuthUser,
    State(state): State<AppState>,
) -> ApiResult<Json<AdminSite>> {
    policy::require_role(&user, Role::Admin)?;
    Ok(Json(state.config.site.clone()))
}

/// list_users
#[utoipa::path(
    get,
    path = "/admin/users",
    params(UserListParams),
    responses((status = 200, description = "Accounts by username", body = [Account]))
)]
pub async fn list_users(
    user: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<UserListParams>,
) -> ApiResult<Json<Vec<Account>>> {
    policy::require_role(&user, Role::Admin)?;
    Ok(Json(state.repo.list_accounts(params.role).await?))
}

/// update_user_role
///
/// [Admin Route] Moves one account into the given role. Also restores a
/// missing profile row.
#[utoipa::path(
    put,
    path = "/admin/users/{id}/role",
    params(("id" = Uuid, Path, description = "User ID")),
    request_body = UpdateRoleRequest,
    responses((status = 200, description = "Updated", body = Account), (status = 404, description = "Not Found"))
)]
pub async fn update_user_role(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateRoleRequest>,
) -> ApiResult<Json<Account>> {
    policy::require_role(&user, Role::Admin)?;
    let account = state
        .repo
        .set_role(id, payload.role)
        .await?
        .ok_or(ApiError::NotFound("Account"))?;
    tracing::info!(target_user = %id, role = %payload.role, admin = %user.id, "role changed");
    Ok(Json(account))
}

/// get_permissions
#[utoipa::path(
    get,
    path = "/admin/permissions",
    responses((status = 200, description = "Role to permission codenames", body = [RolePermissions]))
)]
pub async fn get_permissions(user: AuthUser) -> ApiResult<Json<Vec<RolePermissions>>> {
    policy::require_role(&user, Role::Admin)?;
    Ok(Json(policy::permission_table()))
}

/// get_admin_stats
///
/// [Admin Route] Catalog and user counters for the admin dashboard.
#[utoipa::path(
    get,
    path = "/admin/stats",
    responses((status = 200, description = "Stats", body = AdminDashboardStats))
)]
pub async fn get_admin_stats(
    user: AuthUser,
    State(state): State<AppState>,
) -> ApiResult<Json<AdminDashboardStats>> {
    policy::require_role(&user, Role::Admin)?;
    Ok(Json(state.repo.get_stats().await?))
}
