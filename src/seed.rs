use crate::{
    auth,
    error::ApiError,
    models::{CreateBookRequest, CreateLibraryRequest, NewIdentity},
    policy::Role,
    repository::{Repository, RepositoryError},
};

/// Demo accounts: (username, email, password, role).
const DEMO_ACCOUNTS: [(&str, &str, &str, Role); 3] = [
    ("admin_user", "admin@library.com", "admin123", Role::Admin),
    (
        "librarian_user",
        "librarian@library.com",
        "librarian123",
        Role::Librarian,
    ),
    ("member_user", "member@library.com", "member123", Role::Member),
];

/// Sample catalog: author -> [(title, publication year)].
const DEMO_AUTHORS: [(&str, &[(&str, i32)]); 3] = [
    (
        "J.K. Rowling",
        &[
            ("Harry Potter and the Philosopher's Stone", 1997),
            ("Harry Potter and the Chamber of Secrets", 1998),
        ],
    ),
    ("George Orwell", &[("1984", 1949), ("Animal Farm", 1945)]),
    ("Agatha Christie", &[("Murder on the Orient Express", 1934)]),
];

/// Libraries: (name, location, librarian, titles held).
const DEMO_LIBRARIES: [(&str, &str, &str, &[&str]); 3] = [
    (
        "Central Public Library",
        "Main Street",
        "Alice Johnson",
        &[
            "Harry Potter and the Philosopher's Stone",
            "Harry Potter and the Chamber of Secrets",
            "1984",
        ],
    ),
    (
        "University Library",
        "Campus",
        "Bob Smith",
        &["1984", "Animal Farm", "Murder on the Orient Express"],
    ),
    (
        "Community Library",
        "Riverside",
        "Carol Williams",
        &[
            "Harry Potter and the Philosopher's Stone",
            "Murder on the Orient Express",
        ],
    ),
];

/// SeedReport
#[derive(Debug, Default, PartialEq)]
pub struct SeedReport {
    pub accounts_created: usize,
    pub accounts_skipped: usize,
    pub catalog_seeded: bool,
}

/// seed_demo_data
///
/// Loads the demo accounts and the sample catalog. Safe to run on every start:
/// existing usernames are left untouched and the catalog is only written into
/// an empty store.
pub async fn seed_demo_data(repo: &dyn Repository) -> Result<SeedReport, ApiError> {
    let mut report = SeedReport::default();

    for (username, email, password, role) in DEMO_ACCOUNTS {
        if repo.find_user_by_username(username).await?.is_some() {
            tracing::debug!(username, "demo account exists, skipping");
            report.accounts_skipped += 1;
            continue;
        }
        let hash = auth::hash_password(password)?;
        let account = repo
            .create_identity(NewIdentity::new(username, email, hash))
            .await?;
        repo.set_role(account.id, role).await?;
        tracing::info!(username, %role, "demo account created");
        report.accounts_created += 1;
    }

    if repo.list_authors().await?.is_empty() {
        seed_catalog(repo).await?;
        report.catalog_seeded = true;
    }

    Ok(report)
}

async fn seed_catalog(repo: &dyn Repository) -> Result<(), RepositoryError> {
    let mut titles = Vec::new();
    for (name, books) in DEMO_AUTHORS {
        let author = repo.create_author(name.to_string()).await?;
        for (title, year) in books {
            let book = repo
                .create_book(CreateBookRequest {
                    title: title.to_string(),
                    publication_year: *year,
                    author_id: author.id,
                    ..Default::default()
                })
                .await?;
            titles.push((book.title, book.id));
        }
    }

    for (name, location, librarian, held) in DEMO_LIBRARIES {
        let library = repo
            .create_library(CreateLibraryRequest {
                name: name.to_string(),
                location: location.to_string(),
            })
            .await?;
        for (title, book_id) in titles.iter().filter(|(t, _)| held.contains(&t.as_str())) {
            tracing::trace!(library = name, title = %title, "shelving");
            repo.add_library_book(library.id, *book_id).await?;
        }
        repo.assign_librarian(library.id, librarian.to_string()).await?;
    }

    tracing::info!(
        authors = DEMO_AUTHORS.len(),
        libraries = DEMO_LIBRARIES.len(),
        "demo catalog seeded"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRepository;
    use crate::models::BookFilter;

    #[tokio::test]
    async fn seeding_twice_is_idempotent() {
        let repo = InMemoryRepository::new();

        let first = seed_demo_data(&repo).await.unwrap();
        assert_eq!(first.accounts_created, 3);
        assert!(first.catalog_seeded);

        let second = seed_demo_data(&repo).await.unwrap();
        assert_eq!(second.accounts_created, 0);
        assert_eq!(second.accounts_skipped, 3);
        assert!(!second.catalog_seeded);

        let stats = repo.get_stats().await.unwrap();
        assert_eq!(stats.total_authors, 3);
        assert_eq!(stats.total_books, 5);
        assert_eq!(stats.total_libraries, 3);
        assert_eq!(stats.total_librarians, 3);
        assert_eq!(stats.total_users, 3);
    }

    #[tokio::test]
    async fn demo_accounts_hold_their_roles() {
        let repo = InMemoryRepository::new();
        seed_demo_data(&repo).await.unwrap();

        let librarians = repo.list_accounts(Some(Role::Librarian)).await.unwrap();
        assert_eq!(librarians.len(), 1);
        assert_eq!(librarians[0].username, "librarian_user");

        let admin = repo.find_user_by_username("admin_user").await.unwrap().unwrap();
        assert!(auth::verify_password("admin123", &admin.password_hash));
    }

    #[tokio::test]
    async fn rowling_has_two_books() {
        let repo = InMemoryRepository::new();
        seed_demo_data(&repo).await.unwrap();

        let books = repo
            .list_books(&BookFilter {
                search: Some("rowling".into()),
                limit: 25,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(books.len(), 2);
    }
}
