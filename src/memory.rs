use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    models::{
        Account, AdminDashboardStats, Author, Book, BookFilter, BookSortField, CreateBookRequest,
        CreateLibraryRequest, Librarian, Library, NewIdentity, Session, UpdateBookRequest, User,
        is_recent_year,
    },
    policy::Role,
    repository::{Repository, RepositoryError, RepositoryResult},
};

/// InMemoryRepository
///
/// A `Repository` that keeps every table in process memory. Used when no
/// `DATABASE_URL` is configured locally and as the store behind the handler
/// and end-to-end tests. All tables sit behind one lock, so each operation
/// (including cascades and identity creation) is atomic.
#[derive(Default)]
pub struct InMemoryRepository {
    tables: RwLock<Tables>,
}

#[derive(Default)]
struct Tables {
    next_id: i64,
    authors: BTreeMap<i64, Author>,
    books: BTreeMap<i64, Book>,
    libraries: BTreeMap<i64, Library>,
    // Keyed by library id: at most one librarian per library.
    librarians: BTreeMap<i64, Librarian>,
    // (library_id, book_id)
    holdings: BTreeSet<(i64, i64)>,
    users: HashMap<Uuid, User>,
    profiles: HashMap<Uuid, Role>,
    sessions: HashMap<Uuid, Session>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    /// Fills the joined `author_name` column.
    fn joined(&self, book: &Book) -> Book {
        let mut book = book.clone();
        book.author_name = self
            .authors
            .get(&book.author_id)
            .map(|a| a.name.clone())
            .unwrap_or_default();
        book.is_recent = is_recent_year(book.publication_year);
        book
    }

    fn isbn_taken(&self, isbn: &str, except: Option<i64>) -> bool {
        self.books
            .values()
            .any(|b| b.isbn.as_deref() == Some(isbn) && Some(b.id) != except)
    }

    fn account(&self, user: &User) -> Account {
        Account {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            role: self.profiles.get(&user.id).copied(),
            date_of_birth: user.date_of_birth,
            profile_photo: user.profile_photo.clone(),
            date_joined: user.date_joined,
        }
    }

    fn remove_book_cascade(&mut self, id: i64) -> bool {
        let removed = self.books.remove(&id).is_some();
        self.holdings.retain(|(_, book_id)| *book_id != id);
        removed
    }
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches(book: &Book, filter: &BookFilter) -> bool {
    if filter.publication_year.is_some_and(|y| y != book.publication_year) {
        return false;
    }
    if filter.author_id.is_some_and(|a| a != book.author_id) {
        return false;
    }
    if filter.title.as_ref().is_some_and(|t| *t != book.title) {
        return false;
    }
    if filter.is_available.is_some_and(|a| a != book.is_available) {
        return false;
    }
    if filter.language.is_some() && filter.language != book.language {
        return false;
    }
    if let Some(search) = &filter.search {
        let needle = search.to_lowercase();
        if !book.title.to_lowercase().contains(&needle)
            && !book.author_name.to_lowercase().contains(&needle)
        {
            return false;
        }
    }
    true
}

fn compare(a: &Book, b: &Book, field: BookSortField) -> Ordering {
    match field {
        BookSortField::Title => a.title.cmp(&b.title),
        BookSortField::PublicationYear => a.publication_year.cmp(&b.publication_year),
        BookSortField::Author => a.author_name.cmp(&b.author_name),
        BookSortField::Id => a.id.cmp(&b.id),
    }
}

fn by_title(books: &mut [Book]) {
    books.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn list_books(&self, filter: &BookFilter) -> RepositoryResult<Vec<Book>> {
        let tables = self.tables.read().await;
        let mut books: Vec<Book> = tables
            .books
            .values()
            .map(|b| tables.joined(b))
            .filter(|b| matches(b, filter))
            .collect();

        let ordering = filter.ordering;
        books.sort_by(|a, b| {
            let primary = compare(a, b, ordering.field);
            let primary = if ordering.descending {
                primary.reverse()
            } else {
                primary
            };
            primary.then(a.id.cmp(&b.id))
        });

        let offset = usize::try_from(filter.offset).unwrap_or(0);
        let limit = usize::try_from(filter.limit).unwrap_or(0);
        Ok(books.into_iter().skip(offset).take(limit).collect())
    }

    async fn get_book(&self, id: i64) -> RepositoryResult<Option<Book>> {
        let tables = self.tables.read().await;
        Ok(tables.books.get(&id).map(|b| tables.joined(b)))
    }

    async fn create_book(&self, req: CreateBookRequest) -> RepositoryResult<Book> {
        let mut tables = self.tables.write().await;
        if !tables.authors.contains_key(&req.author_id) {
            return Err(RepositoryError::InvalidReference(
                "author does not exist".to_string(),
            ));
        }
        if let Some(isbn) = &req.isbn {
            if tables.isbn_taken(isbn, None) {
                return Err(RepositoryError::Conflict("isbn".to_string()));
            }
        }

        let now = Utc::now();
        let book = Book {
            id: tables.next_id(),
            title: req.title,
            publication_year: req.publication_year,
            author_id: req.author_id,
            author_name: String::new(),
            isbn: req.isbn,
            pages: req.pages,
            cover: req.cover,
            language: req.language,
            published_on: req.published_on,
            is_available: req.is_available.unwrap_or(true),
            is_recent: is_recent_year(req.publication_year),
            created_at: now,
            updated_at: now,
        };
        tables.books.insert(book.id, book.clone());
        Ok(tables.joined(&book))
    }

    async fn update_book(&self, id: i64, req: UpdateBookRequest) -> RepositoryResult<Option<Book>> {
        let mut tables = self.tables.write().await;
        if !tables.books.contains_key(&id) {
            return Ok(None);
        }
        if let Some(author_id) = req.author_id {
            if !tables.authors.contains_key(&author_id) {
                return Err(RepositoryError::InvalidReference(
                    "author does not exist".to_string(),
                ));
            }
        }
        if let Some(isbn) = &req.isbn {
            if tables.isbn_taken(isbn, Some(id)) {
                return Err(RepositoryError::Conflict("isbn".to_string()));
            }
        }

        let Some(book) = tables.books.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(title) = req.title {
            book.title = title;
        }
        if let Some(year) = req.publication_year {
            book.publication_year = year;
        }
        if let Some(author_id) = req.author_id {
            book.author_id = author_id;
        }
        if req.isbn.is_some() {
            book.isbn = req.isbn;
        }
        if req.pages.is_some() {
            book.pages = req.pages;
        }
        if req.cover.is_some() {
            book.cover = req.cover;
        }
        if req.language.is_some() {
            book.language = req.language;
        }
        if req.published_on.is_some() {
            book.published_on = req.published_on;
        }
        if let Some(available) = req.is_available {
            book.is_available = available;
        }
        book.updated_at = Utc::now();

        let updated = book.clone();
        Ok(Some(tables.joined(&updated)))
    }

    async fn delete_book(&self, id: i64) -> RepositoryResult<bool> {
        let mut tables = self.tables.write().await;
        Ok(tables.remove_book_cascade(id))
    }

    async fn list_authors(&self) -> RepositoryResult<Vec<Author>> {
        let tables = self.tables.read().await;
        let mut authors: Vec<Author> = tables.authors.values().cloned().collect();
        authors.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(authors)
    }

    async fn get_author(&self, id: i64) -> RepositoryResult<Option<Author>> {
        Ok(self.tables.read().await.authors.get(&id).cloned())
    }

    async fn create_author(&self, name: String) -> RepositoryResult<Author> {
        let mut tables = self.tables.write().await;
        let author = Author {
            id: tables.next_id(),
            name,
        };
        tables.authors.insert(author.id, author.clone());
        Ok(author)
    }

    async fn delete_author(&self, id: i64) -> RepositoryResult<bool> {
        let mut tables = self.tables.write().await;
        if tables.authors.remove(&id).is_none() {
            return Ok(false);
        }
        let owned: Vec<i64> = tables
            .books
            .values()
            .filter(|b| b.author_id == id)
            .map(|b| b.id)
            .collect();
        for book_id in owned {
            tables.remove_book_cascade(book_id);
        }
        Ok(true)
    }

    async fn list_libraries(&self) -> RepositoryResult<Vec<Library>> {
        let tables = self.tables.read().await;
        let mut libraries: Vec<Library> = tables.libraries.values().cloned().collect();
        libraries.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(libraries)
    }

    async fn get_library(&self, id: i64) -> RepositoryResult<Option<Library>> {
        Ok(self.tables.read().await.libraries.get(&id).cloned())
    }

    async fn library_books(&self, library_id: i64) -> RepositoryResult<Vec<Book>> {
        let tables = self.tables.read().await;
        let mut books: Vec<Book> = tables
            .holdings
            .range((library_id, i64::MIN)..=(library_id, i64::MAX))
            .filter_map(|(_, book_id)| tables.books.get(book_id))
            .map(|b| tables.joined(b))
            .collect();
        by_title(&mut books);
        Ok(books)
    }

    async fn create_library(&self, req: CreateLibraryRequest) -> RepositoryResult<Library> {
        let mut tables = self.tables.write().await;
        let library = Library {
            id: tables.next_id(),
            name: req.name,
            location: req.location,
        };
        tables.libraries.insert(library.id, library.clone());
        Ok(library)
    }

    async fn delete_library(&self, id: i64) -> RepositoryResult<bool> {
        let mut tables = self.tables.write().await;
        if tables.libraries.remove(&id).is_none() {
            return Ok(false);
        }
        tables.librarians.remove(&id);
        tables.holdings.retain(|(library_id, _)| *library_id != id);
        Ok(true)
    }

    async fn add_library_book(&self, library_id: i64, book_id: i64) -> RepositoryResult<()> {
        let mut tables = self.tables.write().await;
        if !tables.libraries.contains_key(&library_id) || !tables.books.contains_key(&book_id) {
            return Err(RepositoryError::InvalidReference(
                "library or book does not exist".to_string(),
            ));
        }
        tables.holdings.insert((library_id, book_id));
        Ok(())
    }

    async fn remove_library_book(&self, library_id: i64, book_id: i64) -> RepositoryResult<bool> {
        Ok(self
            .tables
            .write()
            .await
            .holdings
            .remove(&(library_id, book_id)))
    }

    async fn get_librarian(&self, library_id: i64) -> RepositoryResult<Option<Librarian>> {
        Ok(self.tables.read().await.librarians.get(&library_id).cloned())
    }

    async fn assign_librarian(&self, library_id: i64, name: String) -> RepositoryResult<Librarian> {
        let mut tables = self.tables.write().await;
        if !tables.libraries.contains_key(&library_id) {
            return Err(RepositoryError::InvalidReference(
                "library does not exist".to_string(),
            ));
        }
        let id = match tables.librarians.get(&library_id) {
            Some(existing) => existing.id,
            None => tables.next_id(),
        };
        let librarian = Librarian {
            id,
            name,
            library_id,
        };
        tables.librarians.insert(library_id, librarian.clone());
        Ok(librarian)
    }

    async fn get_stats(&self) -> RepositoryResult<AdminDashboardStats> {
        let tables = self.tables.read().await;
        let count = |n: usize| i64::try_from(n).unwrap_or(i64::MAX);
        Ok(AdminDashboardStats {
            total_authors: count(tables.authors.len()),
            total_books: count(tables.books.len()),
            total_libraries: count(tables.libraries.len()),
            total_librarians: count(tables.librarians.len()),
            total_users: count(tables.users.len()),
            recent_books: count(
                tables
                    .books
                    .values()
                    .filter(|b| is_recent_year(b.publication_year))
                    .count(),
            ),
            unavailable_books: count(tables.books.values().filter(|b| !b.is_available).count()),
        })
    }

    async fn create_identity(&self, identity: NewIdentity) -> RepositoryResult<Account> {
        let mut tables = self.tables.write().await;
        if tables.users.values().any(|u| u.username == identity.username) {
            return Err(RepositoryError::Conflict("username".to_string()));
        }
        let user = User {
            id: Uuid::new_v4(),
            username: identity.username,
            email: identity.email,
            password_hash: identity.password_hash,
            date_of_birth: identity.date_of_birth,
            profile_photo: identity.profile_photo,
            date_joined: Utc::now(),
        };
        tables.profiles.insert(user.id, Role::default());
        let account = tables.account(&user);
        tables.users.insert(user.id, user);
        Ok(account)
    }

    async fn find_user_by_username(&self, username: &str) -> RepositoryResult<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn get_account(&self, id: Uuid) -> RepositoryResult<Option<Account>> {
        let tables = self.tables.read().await;
        Ok(tables.users.get(&id).map(|u| tables.account(u)))
    }

    async fn list_accounts(&self, role: Option<Role>) -> RepositoryResult<Vec<Account>> {
        let tables = self.tables.read().await;
        let mut accounts: Vec<Account> = tables
            .users
            .values()
            .map(|u| tables.account(u))
            .filter(|a| role.is_none() || a.role == role)
            .collect();
        accounts.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(accounts)
    }

    async fn set_role(&self, user_id: Uuid, role: Role) -> RepositoryResult<Option<Account>> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&user_id) {
            return Ok(None);
        }
        tables.profiles.insert(user_id, role);
        Ok(tables.users.get(&user_id).map(|u| tables.account(u)))
    }

    async fn create_session(
        &self,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> RepositoryResult<Session> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&user_id) {
            return Err(RepositoryError::InvalidReference(
                "user does not exist".to_string(),
            ));
        }
        let now = Utc::now();
        tables.sessions.retain(|_, s| !s.is_expired(now));
        let session = Session {
            id: Uuid::new_v4(),
            user_id,
            created_at: now,
            expires_at,
        };
        tables.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn get_session(&self, id: Uuid) -> RepositoryResult<Option<Session>> {
        Ok(self.tables.read().await.sessions.get(&id).cloned())
    }

    async fn delete_session(&self, id: Uuid) -> RepositoryResult<bool> {
        Ok(self.tables.write().await.sessions.remove(&id).is_some())
    }
}
