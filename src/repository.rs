use crate::{
    models::{
        Account, AdminDashboardStats, Author, Book, BookFilter, BookSortField, CreateBookRequest,
        CreateLibraryRequest, Librarian, Library, NewIdentity, Session, UpdateBookRequest, User,
    },
    policy::Role,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, query_builder::QueryBuilder};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// RepositoryError
///
/// Persistence failures that callers can act on. Constraint violations are
/// classified so handlers can answer 409/400 instead of 500.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// A uniqueness constraint was violated (ISBN, username).
    #[error("{0} already exists")]
    Conflict(String),
    /// A referenced row does not exist (e.g. unknown author on a book).
    #[error("{0}")]
    InvalidReference(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Repository Trait
///
/// The contract for all persistence operations. Handlers only see
/// `Arc<dyn Repository>`, so the Postgres store and the in-memory store are
/// interchangeable.
///
/// Cascade rules every implementation honors:
/// - deleting an author deletes its books;
/// - deleting a library deletes its librarian and its holdings;
/// - deleting a book removes it from every library.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Books ---
    async fn list_books(&self, filter: &BookFilter) -> RepositoryResult<Vec<Book>>;
    async fn get_book(&self, id: i64) -> RepositoryResult<Option<Book>>;
    async fn create_book(&self, req: CreateBookRequest) -> RepositoryResult<Book>;
    // Partial update; `None` when the book does not exist.
    async fn update_book(&self, id: i64, req: UpdateBookRequest) -> RepositoryResult<Option<Book>>;
    // Returns true if a row was deleted.
    async fn delete_book(&self, id: i64) -> RepositoryResult<bool>;

    // --- Authors ---
    async fn list_authors(&self) -> RepositoryResult<Vec<Author>>;
    async fn get_author(&self, id: i64) -> RepositoryResult<Option<Author>>;
    async fn create_author(&self, name: String) -> RepositoryResult<Author>;
    async fn delete_author(&self, id: i64) -> RepositoryResult<bool>;

    // --- Libraries ---
    async fn list_libraries(&self) -> RepositoryResult<Vec<Library>>;
    async fn get_library(&self, id: i64) -> RepositoryResult<Option<Library>>;
    async fn library_books(&self, library_id: i64) -> RepositoryResult<Vec<Book>>;
    async fn create_library(&self, req: CreateLibraryRequest) -> RepositoryResult<Library>;
    async fn delete_library(&self, id: i64) -> RepositoryResult<bool>;
    // Idempotent: adding a held book again is not an error.
    async fn add_library_book(&self, library_id: i64, book_id: i64) -> RepositoryResult<()>;
    async fn remove_library_book(&self, library_id: i64, book_id: i64) -> RepositoryResult<bool>;
    async fn get_librarian(&self, library_id: i64) -> RepositoryResult<Option<Librarian>>;
    // Creates the librarian or renames the existing one; a library never has two.
    async fn assign_librarian(&self, library_id: i64, name: String) -> RepositoryResult<Librarian>;

    async fn get_stats(&self) -> RepositoryResult<AdminDashboardStats>;

    // --- Identity ---
    /// Creates the user and its Member profile in one unit of work.
    async fn create_identity(&self, identity: NewIdentity) -> RepositoryResult<Account>;
    async fn find_user_by_username(&self, username: &str) -> RepositoryResult<Option<User>>;
    async fn get_account(&self, id: Uuid) -> RepositoryResult<Option<Account>>;
    async fn list_accounts(&self, role: Option<Role>) -> RepositoryResult<Vec<Account>>;
    async fn set_role(&self, user_id: Uuid, role: Role) -> RepositoryResult<Option<Account>>;

    // --- Sessions ---
    async fn create_session(
        &self,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> RepositoryResult<Session>;
    async fn get_session(&self, id: Uuid) -> RepositoryResult<Option<Session>>;
    async fn delete_session(&self, id: Uuid) -> RepositoryResult<bool>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn Repository>;

/// PostgresRepository
///
/// The `Repository` backed by PostgreSQL. Schema lives in `migrations/`.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies the embedded migrations.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

const BOOK_SELECT: &str = r#"
    SELECT b.id, b.title, b.publication_year, b.author_id, a.name AS author_name,
           b.isbn, b.pages, b.cover, b.language, b.published_on, b.is_available,
           b.created_at, b.updated_at, (b.publication_year >= 2000) AS is_recent
    FROM books b
    JOIN authors a ON a.id = b.author_id
"#;

const ACCOUNT_SELECT: &str = r#"
    SELECT u.id, u.username, u.email, p.role, u.date_of_birth, u.profile_photo, u.date_joined
    FROM users u
    LEFT JOIN profiles p ON p.user_id = u.id
"#;

/// Turns constraint violations into their domain meaning.
fn classify(err: sqlx::Error, unique: &str, reference: &str) -> RepositoryError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return RepositoryError::Conflict(unique.to_string());
        }
        if db_err.is_foreign_key_violation() {
            return RepositoryError::InvalidReference(reference.to_string());
        }
    }
    RepositoryError::Database(err)
}

/// Makes `%`, `_` and `\` match literally inside an `ILIKE ... ESCAPE '\'` pattern.
fn escape_like(raw: &str) -> String {
    raw.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn sort_column(field: BookSortField) -> &'static str {
    match field {
        BookSortField::Title => "b.title",
        BookSortField::PublicationYear => "b.publication_year",
        BookSortField::Author => "a.name",
        BookSortField::Id => "b.id",
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    /// list_books
    ///
    /// Builds the filter with QueryBuilder so every user-supplied value is a
    /// bound parameter. The ORDER BY column comes from a closed enum.
    async fn list_books(&self, filter: &BookFilter) -> RepositoryResult<Vec<Book>> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(BOOK_SELECT);
        builder.push(" WHERE TRUE");

        if let Some(year) = filter.publication_year {
            builder.push(" AND b.publication_year = ").push_bind(year);
        }
        if let Some(author_id) = filter.author_id {
            builder.push(" AND b.author_id = ").push_bind(author_id);
        }
        if let Some(title) = &filter.title {
            builder.push(" AND b.title = ").push_bind(title.clone());
        }
        if let Some(available) = filter.is_available {
            builder.push(" AND b.is_available = ").push_bind(available);
        }
        if let Some(language) = &filter.language {
            builder.push(" AND b.language = ").push_bind(language.clone());
        }
        if let Some(search) = &filter.search {
            let pattern = format!("%{}%", escape_like(search));
            builder.push(" AND (b.title ILIKE ");
            builder.push_bind(pattern.clone());
            builder.push(r" ESCAPE '\' OR a.name ILIKE ");
            builder.push_bind(pattern);
            builder.push(r" ESCAPE '\')");
        }

        let direction = if filter.ordering.descending { "DESC" } else { "ASC" };
        builder.push(format!(
            " ORDER BY {} {}, b.id ASC",
            sort_column(filter.ordering.field),
            direction
        ));
        builder.push(" LIMIT ").push_bind(filter.limit);
        builder.push(" OFFSET ").push_bind(filter.offset);

        Ok(builder
            .build_query_as::<Book>()
            .fetch_all(&self.pool)
            .await?)
    }

    async fn get_book(&self, id: i64) -> RepositoryResult<Option<Book>> {
        let sql = format!("{BOOK_SELECT} WHERE b.id = $1");
        Ok(sqlx::query_as::<_, Book>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// create_book
    ///
    /// Inserts and re-joins with `authors` in one statement (CTE) so the
    /// returned row carries `author_name`.
    async fn create_book(&self, req: CreateBookRequest) -> RepositoryResult<Book> {
        sqlx::query_as::<_, Book>(
            r#"
            WITH b AS (
                INSERT INTO books (title, publication_year, author_id, isbn, pages, cover,
                                   language, published_on, is_available, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW(), NOW())
                RETURNING *
            )
            SELECT b.id, b.title, b.publication_year, b.author_id, a.name AS author_name,
                   b.isbn, b.pages, b.cover, b.language, b.published_on, b.is_available,
                   b.created_at, b.updated_at, (b.publication_year >= 2000) AS is_recent
            FROM b JOIN authors a ON a.id = b.author_id
            "#,
        )
        .bind(req.title)
        .bind(req.publication_year)
        .bind(req.author_id)
        .bind(req.isbn)
        .bind(req.pages)
        .bind(req.cover)
        .bind(req.language)
        .bind(req.published_on)
        .bind(req.is_available.unwrap_or(true))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| classify(e, "isbn", "author does not exist"))
    }

    /// update_book
    ///
    /// COALESCE keeps the stored value for every field the request leaves out.
    async fn update_book(&self, id: i64, req: UpdateBookRequest) -> RepositoryResult<Option<Book>> {
        sqlx::query_as::<_, Book>(
            r#"
            WITH b AS (
                UPDATE books
                SET title = COALESCE($2, title),
                    publication_year = COALESCE($3, publication_year),
                    author_id = COALESCE($4, author_id),
                    isbn = COALESCE($5, isbn),
                    pages = COALESCE($6, pages),
                    cover = COALESCE($7, cover),
                    language = COALESCE($8, language),
                    published_on = COALESCE($9, published_on),
                    is_available = COALESCE($10, is_available),
                    updated_at = NOW()
                WHERE id = $1
                RETURNING *
            )
            SELECT b.id, b.title, b.publication_year, b.author_id, a.name AS author_name,
                   b.isbn, b.pages, b.cover, b.language, b.published_on, b.is_available,
                   b.created_at, b.updated_at, (b.publication_year >= 2000) AS is_recent
            FROM b JOIN authors a ON a.id = b.author_id
            "#,
        )
        .bind(id)
        .bind(req.title)
        .bind(req.publication_year)
        .bind(req.author_id)
        .bind(req.isbn)
        .bind(req.pages)
        .bind(req.cover)
        .bind(req.language)
        .bind(req.published_on)
        .bind(req.is_available)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| classify(e, "isbn", "author does not exist"))
    }

    async fn delete_book(&self, id: i64) -> RepositoryResult<bool> {
        let res = sqlx::query("DELETE FROM books WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn list_authors(&self) -> RepositoryResult<Vec<Author>> {
        Ok(
            sqlx::query_as::<_, Author>("SELECT id, name FROM authors ORDER BY name ASC, id ASC")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    async fn get_author(&self, id: i64) -> RepositoryResult<Option<Author>> {
        Ok(
            sqlx::query_as::<_, Author>("SELECT id, name FROM authors WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn create_author(&self, name: String) -> RepositoryResult<Author> {
        Ok(
            sqlx::query_as::<_, Author>("INSERT INTO authors (name) VALUES ($1) RETURNING id, name")
                .bind(name)
                .fetch_one(&self.pool)
                .await?,
        )
    }

    /// delete_author
    ///
    /// `books.author_id` is ON DELETE CASCADE, which in turn clears `library_books`.
    async fn delete_author(&self, id: i64) -> RepositoryResult<bool> {
        let res = sqlx::query("DELETE FROM authors WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn list_libraries(&self) -> RepositoryResult<Vec<Library>> {
        Ok(sqlx::query_as::<_, Library>(
            "SELECT id, name, location FROM libraries ORDER BY name ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    async fn get_library(&self, id: i64) -> RepositoryResult<Option<Library>> {
        Ok(
            sqlx::query_as::<_, Library>("SELECT id, name, location FROM libraries WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn library_books(&self, library_id: i64) -> RepositoryResult<Vec<Book>> {
        let sql = format!(
            "{BOOK_SELECT} JOIN library_books lb ON lb.book_id = b.id \
             WHERE lb.library_id = $1 ORDER BY b.title ASC, b.id ASC"
        );
        Ok(sqlx::query_as::<_, Book>(&sql)
            .bind(library_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn create_library(&self, req: CreateLibraryRequest) -> RepositoryResult<Library> {
        Ok(sqlx::query_as::<_, Library>(
            "INSERT INTO libraries (name, location) VALUES ($1, $2) RETURNING id, name, location",
        )
        .bind(req.name)
        .bind(req.location)
        .fetch_one(&self.pool)
        .await?)
    }

    /// delete_library
    ///
    /// `librarians.library_id` and `library_books.library_id` cascade.
    async fn delete_library(&self, id: i64) -> RepositoryResult<bool> {
        let res = sqlx::query("DELETE FROM libraries WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn add_library_book(&self, library_id: i64, book_id: i64) -> RepositoryResult<()> {
        sqlx::query(
            "INSERT INTO library_books (library_id, book_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(library_id)
        .bind(book_id)
        .execute(&self.pool)
        .await
        .map_err(|e| classify(e, "holding", "library or book does not exist"))?;
        Ok(())
    }

    async fn remove_library_book(&self, library_id: i64, book_id: i64) -> RepositoryResult<bool> {
        let res = sqlx::query("DELETE FROM library_books WHERE library_id = $1 AND book_id = $2")
            .bind(library_id)
            .bind(book_id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn get_librarian(&self, library_id: i64) -> RepositoryResult<Option<Librarian>> {
        Ok(sqlx::query_as::<_, Librarian>(
            "SELECT id, name, library_id FROM librarians WHERE library_id = $1",
        )
        .bind(library_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn assign_librarian(&self, library_id: i64, name: String) -> RepositoryResult<Librarian> {
        sqlx::query_as::<_, Librarian>(
            r#"
            INSERT INTO librarians (name, library_id) VALUES ($1, $2)
            ON CONFLICT (library_id) DO UPDATE SET name = EXCLUDED.name
            RETURNING id, name, library_id
            "#,
        )
        .bind(name)
        .bind(library_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| classify(e, "librarian", "library does not exist"))
    }

    /// get_stats
    ///
    /// All dashboard counters in a single round trip.
    async fn get_stats(&self) -> RepositoryResult<AdminDashboardStats> {
        Ok(sqlx::query_as::<_, AdminDashboardStats>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM authors) AS total_authors,
                (SELECT COUNT(*) FROM books) AS total_books,
                (SELECT COUNT(*) FROM libraries) AS total_libraries,
                (SELECT COUNT(*) FROM librarians) AS total_librarians,
                (SELECT COUNT(*) FROM users) AS total_users,
                (SELECT COUNT(*) FROM books WHERE publication_year >= 2000) AS recent_books,
                (SELECT COUNT(*) FROM books WHERE NOT is_available) AS unavailable_books
            "#,
        )
        .fetch_one(&self.pool)
        .await?)
    }

    /// create_identity
    ///
    /// User and profile rows are written in one transaction, so an identity
    /// created here always has exactly one profile.
    async fn create_identity(&self, identity: NewIdentity) -> RepositoryResult<Account> {
        let mut tx = self.pool.begin().await?;

        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, username, email, password_hash, date_of_birth,
                               profile_photo, date_joined)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            RETURNING id, username, email, password_hash, date_of_birth, profile_photo,
                      date_joined
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(identity.username)
        .bind(identity.email)
        .bind(identity.password_hash)
        .bind(identity.date_of_birth)
        .bind(identity.profile_photo)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| classify(e, "username", "user"))?;

        sqlx::query("INSERT INTO profiles (user_id, role) VALUES ($1, $2)")
            .bind(user.id)
            .bind(Role::default())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Account {
            id: user.id,
            username: user.username,
            email: user.email,
            role: Some(Role::default()),
            date_of_birth: user.date_of_birth,
            profile_photo: user.profile_photo,
            date_joined: user.date_joined,
        })
    }

    async fn find_user_by_username(&self, username: &str) -> RepositoryResult<Option<User>> {
        Ok(sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, date_of_birth, profile_photo, date_joined
            FROM users WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn get_account(&self, id: Uuid) -> RepositoryResult<Option<Account>> {
        let sql = format!("{ACCOUNT_SELECT} WHERE u.id = $1");
        Ok(sqlx::query_as::<_, Account>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_accounts(&self, role: Option<Role>) -> RepositoryResult<Vec<Account>> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(ACCOUNT_SELECT);
        if let Some(role) = role {
            builder.push(" WHERE p.role = ").push_bind(role);
        }
        builder.push(" ORDER BY u.username ASC");
        Ok(builder
            .build_query_as::<Account>()
            .fetch_all(&self.pool)
            .await?)
    }

    /// set_role
    ///
    /// Upserts the profile row. Returns `None` when the user does not exist.
    async fn set_role(&self, user_id: Uuid, role: Role) -> RepositoryResult<Option<Account>> {
        let res = sqlx::query(
            r#"
            INSERT INTO profiles (user_id, role) VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE SET role = EXCLUDED.role
            "#,
        )
        .bind(user_id)
        .bind(role)
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => self.get_account(user_id).await,
            Err(e) => match classify(e, "profile", "user does not exist") {
                RepositoryError::InvalidReference(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    /// create_session
    ///
    /// Expired sessions are swept on every login, so the table only holds
    /// live sessions plus those that lapsed since the last login.
    async fn create_session(
        &self,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> RepositoryResult<Session> {
        let purged = sqlx::query("DELETE FROM sessions WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await?
            .rows_affected();
        if purged > 0 {
            tracing::debug!(purged, "expired sessions removed");
        }

        Ok(sqlx::query_as::<_, Session>(
            r#"
            INSERT INTO sessions (id, user_id, created_at, expires_at)
            VALUES ($1, $2, NOW(), $3)
            RETURNING id, user_id, created_at, expires_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn get_session(&self, id: Uuid) -> RepositoryResult<Option<Session>> {
        Ok(sqlx::query_as::<_, Session>(
            "SELECT id, user_id, created_at, expires_at FROM sessions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn delete_session(&self, id: Uuid) -> RepositoryResult<bool> {
        let res = sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}
