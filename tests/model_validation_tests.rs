use library_catalog::{
    models::{Account, CoverKind, CreateBookRequest, RegisterRequest, UpdateBookRequest},
    policy::{self, Capability, Role},
};
use validator::Validate;

// --- Tests ---

#[test]
fn test_enums_use_their_wire_names() {
    // Roles travel with their capitalised names, covers and capabilities in lowercase.
    assert_eq!(serde_json::to_string(&Role::Librarian).unwrap(), r#""Librarian""#);
    assert_eq!(serde_json::to_string(&CoverKind::Ebook).unwrap(), r#""ebook""#);
    assert_eq!(serde_json::to_string(&Capability::Delete).unwrap(), r#""delete""#);

    let role: Role = serde_json::from_str(r#""Admin""#).unwrap();
    assert_eq!(role, Role::Admin);
    assert!(serde_json::from_str::<Role>(r#""superuser""#).is_err());
}

#[test]
fn test_update_book_request_accepts_any_subset() {
    let partial: UpdateBookRequest =
        serde_json::from_str(r#"{"pages": 320, "cover": "hardcover"}"#).unwrap();

    assert_eq!(partial.pages, Some(320));
    assert_eq!(partial.cover, Some(CoverKind::Hardcover));
    assert!(partial.title.is_none());
    assert!(partial.check().is_ok());

    let bad: UpdateBookRequest = serde_json::from_str(r#"{"pages": 0}"#).unwrap();
    assert!(bad.check().unwrap_err().field_errors().contains_key("pages"));
}

#[test]
fn test_create_book_request_defaults_optional_fields() {
    let req: CreateBookRequest = serde_json::from_str(
        r#"{"title": "Murder on the Orient Express", "publication_year": 1934, "author_id": 3}"#,
    )
    .unwrap();

    assert!(req.isbn.is_none());
    assert!(req.is_available.is_none());
    assert!(req.check().is_ok());
}

#[test]
fn test_register_request_validation() {
    let req = RegisterRequest {
        username: "ab".to_string(),
        email: "not-an-email".to_string(),
        password: "short".to_string(),
        ..Default::default()
    };

    let errors = req.validate().unwrap_err();
    let fields = errors.field_errors();
    assert!(fields.contains_key("username"));
    assert!(fields.contains_key("email"));
    assert!(fields.contains_key("password"));
}

#[test]
fn test_register_request_rejects_future_birth_date_and_overlong_email() {
    let tomorrow = chrono::Utc::now().date_naive() + chrono::Duration::days(1);
    let req = RegisterRequest {
        username: "reader".to_string(),
        // Every label is valid on its own; only the total length is too long.
        email: format!("reader@{}.com", vec!["a".repeat(60); 5].join(".")),
        password: "long-enough-password".to_string(),
        date_of_birth: Some(tomorrow),
        profile_photo: None,
    };

    let errors = req.validate().unwrap_err();
    let fields = errors.field_errors();
    assert!(fields.contains_key("email"));
    assert!(fields.contains_key("date_of_birth"));
    assert!(!fields.contains_key("profile_photo"));
}

#[test]
fn test_register_request_optional_profile_fields() {
    let req: RegisterRequest = serde_json::from_str(
        r#"{"username": "reader", "email": "reader@library.com", "password": "long-enough-password",
            "date_of_birth": "1988-02-29", "profile_photo": "profile_photos/reader.png"}"#,
    )
    .unwrap();
    assert!(req.validate().is_ok());
    assert_eq!(req.date_of_birth, chrono::NaiveDate::from_ymd_opt(1988, 2, 29));

    let minimal: RegisterRequest = serde_json::from_str(
        r#"{"username": "reader", "email": "reader@library.com", "password": "long-enough-password"}"#,
    )
    .unwrap();
    assert!(minimal.date_of_birth.is_none());
    assert!(minimal.profile_photo.is_none());
}

#[test]
fn test_account_without_profile_serializes_null_role() {
    let account = Account {
        username: "orphan".to_string(),
        role: None,
        ..Default::default()
    };

    let json = serde_json::to_value(&account).unwrap();
    assert!(json["role"].is_null());
    assert!(json.get("password_hash").is_none());
}

#[test]
fn test_permission_table_uses_book_codenames() {
    let table = policy::permission_table();

    let librarians = table.iter().find(|row| row.role == Role::Librarian).unwrap();
    assert_eq!(librarians.group, "Librarians");
    assert_eq!(
        librarians.permissions,
        vec!["can_view_book", "can_add_book", "can_change_book"]
    );

    let members = table.iter().find(|row| row.role == Role::Member).unwrap();
    assert_eq!(members.permissions, vec!["can_view_book"]);
}
