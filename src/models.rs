use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::policy::{Capability, Role};

// --- Catalog Schemas (Mapped to Database) ---

/// CoverKind
///
/// Physical (or not) format of a book. Stored as the Postgres enum `cover_kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, sqlx::Type)]
#[sqlx(type_name = "cover_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum CoverKind {
    Hardcover,
    Paperback,
    Ebook,
}

/// Author
///
/// Row of the `authors` table. Owns zero or more books; deleting an author
/// cascades to its books.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct Author {
    pub id: i64,
    pub name: String,
}

/// Book
///
/// Row of the `books` table, enriched with the author's name via a JOIN.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct Book {
    pub id: i64,
    pub title: String,
    pub publication_year: i32,
    pub author_id: i64,
    // Loaded via JOIN on authors.
    #[sqlx(default)]
    pub author_name: String,

    // Extended attributes, all optional.
    pub isbn: Option<String>,
    pub pages: Option<i32>,
    pub cover: Option<CoverKind>,
    pub language: Option<String>,
    #[ts(type = "string | null")]
    pub published_on: Option<NaiveDate>,
    pub is_available: bool,
    /// Derived: published in or after `RECENT_SINCE_YEAR`.
    #[sqlx(default)]
    pub is_recent: bool,

    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

/// First publication year counted as recent.
pub const RECENT_SINCE_YEAR: i32 = 2000;

pub fn is_recent_year(publication_year: i32) -> bool {
    publication_year >= RECENT_SINCE_YEAR
}

/// Library
///
/// Row of the `libraries` table. Holds books through `library_books`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct Library {
    pub id: i64,
    pub name: String,
    pub location: String,
}

/// Librarian
///
/// Row of the `librarians` table. `library_id` is unique: one librarian per library.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct Librarian {
    pub id: i64,
    pub name: String,
    pub library_id: i64,
}

/// LibraryDetail
///
/// Output schema for GET /libraries/{id}.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LibraryDetail {
    pub library: Library,
    pub librarian: Option<Librarian>,
    pub books: Vec<Book>,
    pub book_count: usize,
}

/// AuthorDetail
///
/// Output schema for GET /authors/{id}.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct AuthorDetail {
    pub author: Author,
    pub books: Vec<Book>,
    pub book_count: usize,
}

// --- Identity Schemas ---

/// User
///
/// The identity record in the `users` table. The password hash never leaves the server.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Default)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub date_of_birth: Option<NaiveDate>,
    pub profile_photo: Option<String>,
    pub date_joined: DateTime<Utc>,
}

/// NewIdentity
///
/// Everything needed to create a user; the password is already hashed.
#[derive(Debug, Clone, Default)]
pub struct NewIdentity {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub date_of_birth: Option<NaiveDate>,
    pub profile_photo: Option<String>,
}

impl NewIdentity {
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password_hash: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            password_hash: password_hash.into(),
            ..Default::default()
        }
    }
}

/// Account
///
/// An identity joined with its profile. `role` is `None` when the profile row
/// is missing, which fails every role check.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct Account {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Option<Role>,
    #[ts(type = "string | null")]
    pub date_of_birth: Option<NaiveDate>,
    /// URL or storage path of the profile photo.
    pub profile_photo: Option<String>,
    #[ts(type = "string")]
    pub date_joined: DateTime<Utc>,
}

/// Session
///
/// Server-side record backing an issued bearer token. Logout deletes it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

// --- Request Payloads (Input Schemas) ---

/// CreateBookRequest
///
/// Input payload for POST /books.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate, Default)]
#[ts(export)]
pub struct CreateBookRequest {
    #[validate(length(min = 1, max = 200, message = "title must be 1-200 characters"))]
    pub title: String,
    #[validate(range(min = 1000, message = "publication year must be 1000 or later"))]
    pub publication_year: i32,
    pub author_id: i64,
    pub isbn: Option<String>,
    #[validate(range(min = 1, message = "pages must be positive"))]
    pub pages: Option<i32>,
    pub cover: Option<CoverKind>,
    #[validate(length(min = 1, max = 50, message = "language must be 1-50 characters"))]
    pub language: Option<String>,
    #[ts(type = "string | null")]
    pub published_on: Option<NaiveDate>,
    pub is_available: Option<bool>,
}

impl CreateBookRequest {
    /// Derived field checks plus the checks that depend on the current date.
    pub fn check(&self) -> Result<(), ValidationErrors> {
        let errors = self.validate().err().unwrap_or_default();
        finish_book_checks(errors, Some(self.publication_year), self.isbn.as_deref())
    }
}

/// UpdateBookRequest
///
/// Partial update payload for PUT /books/{id}. Absent fields keep their value.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate, Default)]
#[ts(export)]
pub struct UpdateBookRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 200, message = "title must be 1-200 characters"))]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1000, message = "publication year must be 1000 or later"))]
    pub publication_year: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_id: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub isbn: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1, message = "pages must be positive"))]
    pub pages: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover: Option<CoverKind>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 50, message = "language must be 1-50 characters"))]
    pub language: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[ts(type = "string | null")]
    pub published_on: Option<NaiveDate>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_available: Option<bool>,
}

impl UpdateBookRequest {
    pub fn check(&self) -> Result<(), ValidationErrors> {
        let errors = self.validate().err().unwrap_or_default();
        finish_book_checks(errors, self.publication_year, self.isbn.as_deref())
    }
}

fn finish_book_checks(
    mut errors: ValidationErrors,
    publication_year: Option<i32>,
    isbn: Option<&str>,
) -> Result<(), ValidationErrors> {
    if let Some(year) = publication_year {
        if year > Utc::now().year() {
            errors.add(
                "publication_year",
                field_error("range", "publication year cannot be in the future"),
            );
        }
    }
    if let Some(isbn) = isbn {
        if isbn.len() != 13 || !isbn.chars().all(|c| c.is_ascii_digit()) {
            errors.add("isbn", field_error("isbn", "isbn must be exactly 13 digits"));
        }
    }
    if errors.errors().is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn field_error(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(message.into());
    err
}

/// CreateAuthorRequest
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate, Default)]
#[ts(export)]
pub struct CreateAuthorRequest {
    #[validate(length(min = 1, max = 100, message = "name must be 1-100 characters"))]
    pub name: String,
}

/// CreateLibraryRequest
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate, Default)]
#[ts(export)]
pub struct CreateLibraryRequest {
    #[validate(length(min = 1, max = 100, message = "name must be 1-100 characters"))]
    pub name: String,
    #[serde(default)]
    #[validate(length(max = 200, message = "location must be at most 200 characters"))]
    pub location: String,
}

/// AssignLibrarianRequest
///
/// Input payload for PUT /libraries/{id}/librarian.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate, Default)]
#[ts(export)]
pub struct AssignLibrarianRequest {
    #[validate(length(min = 1, max = 100, message = "name must be 1-100 characters"))]
    pub name: String,
}

/// RegisterRequest
///
/// Input payload for POST /register. New accounts always start as Member.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate, Default)]
#[ts(export)]
pub struct RegisterRequest {
    #[validate(length(min = 3, max = 150, message = "username must be 3-150 characters"))]
    pub username: String,
    #[validate(
        email(message = "email must be a valid address"),
        length(max = 254, message = "email must be at most 254 characters")
    )]
    pub email: String,
    #[validate(length(min = 8, max = 128, message = "password must be 8-128 characters"))]
    pub password: String,
    #[serde(default)]
    #[ts(type = "string | null")]
    #[validate(custom(function = "not_in_future"))]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    #[validate(length(min = 1, max = 255, message = "profile photo must be 1-255 characters"))]
    pub profile_photo: Option<String>,
}

fn not_in_future(date: &NaiveDate) -> Result<(), ValidationError> {
    if *date > Utc::now().date_naive() {
        return Err(field_error("range", "date of birth cannot be in the future"));
    }
    Ok(())
}

/// LoginRequest
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// LoginResponse
///
/// Output schema of POST /login. The token is sent back as `Authorization: Bearer <token>`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginResponse {
    pub token: String,
    pub token_type: String,
    #[ts(type = "string")]
    pub expires_at: DateTime<Utc>,
    pub account: Account,
}

/// UpdateRoleRequest
///
/// Input payload for PUT /admin/users/{id}/role.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UpdateRoleRequest {
    pub role: Role,
}

// --- Listing ---

/// Column a book listing can be ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BookSortField {
    #[default]
    Title,
    PublicationYear,
    Author,
    Id,
}

/// BookOrdering
///
/// Parsed form of the `ordering` query parameter: a field name, optionally
/// prefixed with `-` for descending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BookOrdering {
    pub field: BookSortField,
    pub descending: bool,
}

impl BookOrdering {
    pub fn parse(raw: &str) -> Option<Self> {
        let (descending, name) = match raw.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        let field = match name {
            "title" => BookSortField::Title,
            "publication_year" => BookSortField::PublicationYear,
            "author" => BookSortField::Author,
            "id" => BookSortField::Id,
            _ => return None,
        };
        Some(Self { field, descending })
    }
}

/// BookFilter
///
/// Repository-level listing criteria: exact filters, substring search over
/// title and author name, ordering, and a page window.
#[derive(Debug, Clone, Default)]
pub struct BookFilter {
    pub publication_year: Option<i32>,
    pub author_id: Option<i64>,
    pub title: Option<String>,
    pub is_available: Option<bool>,
    pub language: Option<String>,
    pub search: Option<String>,
    pub ordering: BookOrdering,
    pub limit: i64,
    pub offset: i64,
}

// --- Dashboard & Admin Schemas (Output) ---

/// AdminDashboardStats
///
/// Output schema for GET /admin/stats.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct AdminDashboardStats {
    pub total_authors: i64,
    pub total_books: i64,
    pub total_libraries: i64,
    pub total_librarians: i64,
    pub total_users: i64,
    /// Books published in or after 2000.
    pub recent_books: i64,
    pub unavailable_books: i64,
}

/// Dashboard
///
/// Output schema for GET /dashboard: who the caller is and what they may do.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct Dashboard {
    pub username: String,
    pub role: Option<Role>,
    pub capabilities: Vec<Capability>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_accepts_known_fields_with_direction() {
        assert_eq!(
            BookOrdering::parse("-publication_year"),
            Some(BookOrdering {
                field: BookSortField::PublicationYear,
                descending: true
            })
        );
        assert_eq!(
            BookOrdering::parse("author"),
            Some(BookOrdering {
                field: BookSortField::Author,
                descending: false
            })
        );
        assert_eq!(BookOrdering::parse("pages"), None);
        assert_eq!(BookOrdering::parse("--title"), None);
    }

    #[test]
    fn book_check_rejects_future_year_and_bad_isbn() {
        let req = CreateBookRequest {
            title: "Future".into(),
            publication_year: Utc::now().year() + 1,
            author_id: 1,
            isbn: Some("12345".into()),
            ..Default::default()
        };
        let errors = req.check().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("publication_year"));
        assert!(fields.contains_key("isbn"));
    }

    #[test]
    fn book_check_accepts_valid_payload() {
        let req = CreateBookRequest {
            title: "Animal Farm".into(),
            publication_year: 1945,
            author_id: 1,
            isbn: Some("9780451526342".into()),
            pages: Some(112),
            cover: Some(CoverKind::Paperback),
            ..Default::default()
        };
        assert!(req.check().is_ok());
    }

    #[test]
    fn partial_update_skips_absent_fields() {
        let update = UpdateBookRequest {
            title: Some("New Title Only".into()),
            ..Default::default()
        };
        assert!(update.check().is_ok());
        let json = serde_json::to_string(&update).unwrap();
        assert!(json.contains(r#""title":"New Title Only""#));
        assert!(!json.contains("isbn"));
    }

    #[test]
    fn password_hash_is_never_serialized() {
        let user = User {
            password_hash: "$argon2id$secret".into(),
            ..Default::default()
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("argon2"));
    }

    #[test]
    fn recent_threshold_is_2000() {
        assert!(!is_recent_year(1999));
        assert!(is_recent_year(2000));

        let book = Book {
            publication_year: 2005,
            is_recent: true,
            ..Default::default()
        };
        let json = serde_json::to_value(&book).unwrap();
        assert_eq!(json["is_recent"], true);
    }
}
