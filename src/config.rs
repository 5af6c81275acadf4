use serde::{Deserialize, Serialize};
use std::{env, ops::RangeInclusive};
use thiserror::Error;
use ts_rs::TS;
use utoipa::ToSchema;

const LOCAL_JWT_SECRET: &str = "super-secure-test-secret-value-local";
const DEFAULT_PAGE_SIZE: i64 = 25;
const DEFAULT_TOKEN_TTL_SECS: i64 = 8 * 60 * 60;
/// Sessions never outlive 30 days.
pub const MAX_TOKEN_TTL_SECS: i64 = 30 * 24 * 60 * 60;
const MAX_PAGE_SIZE: i64 = 100;

/// AppConfig
///
/// The application's entire configuration, loaded once at startup and shared
/// immutably through `AppState`.
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Runtime environment marker. Controls the development bypass and secret requirements.
    pub env: Env,
    /// Postgres connection string. Locally, `None` selects the in-memory repository.
    pub db_url: Option<String>,
    /// HMAC secret used to sign and validate bearer tokens.
    pub jwt_secret: String,
    /// Lifetime of an issued token and its session.
    pub token_ttl_secs: i64,
    pub bind_addr: String,
    /// Default page size of list endpoints.
    pub page_size: i64,
    /// Seed demo accounts and the sample catalog at startup.
    pub seed_demo_data: bool,
    /// Admin site metadata and registered models.
    pub site: AdminSite,
}

/// Env
#[derive(Clone, PartialEq, Debug)]
pub enum Env {
    Local,
    Production,
}

/// ConfigError
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set in production")]
    Missing(&'static str),
    #[error("{key} has an invalid value: {value}")]
    Invalid { key: &'static str, value: String },
}

/// ModelAdmin
///
/// How a registered model is presented by the admin listing: columns,
/// filters, searchable fields, default ordering and page size.
#[derive(Clone, Debug, Serialize, Deserialize, TS, ToSchema, PartialEq)]
#[ts(export)]
pub struct ModelAdmin {
    pub model: String,
    pub list_display: Vec<String>,
    pub list_filter: Vec<String>,
    pub search_fields: Vec<String>,
    pub ordering: Vec<String>,
    pub list_per_page: i64,
}

impl ModelAdmin {
    fn new(model: &str, page_size: i64) -> Self {
        Self {
            model: model.to_string(),
            list_display: Vec::new(),
            list_filter: Vec::new(),
            search_fields: Vec::new(),
            ordering: Vec::new(),
            list_per_page: page_size,
        }
    }

    fn columns(mut self, list_display: &[&str]) -> Self {
        self.list_display = list_display.iter().map(|s| s.to_string()).collect();
        self
    }

    fn filters(mut self, list_filter: &[&str]) -> Self {
        self.list_filter = list_filter.iter().map(|s| s.to_string()).collect();
        self
    }

    fn search(mut self, search_fields: &[&str]) -> Self {
        self.search_fields = search_fields.iter().map(|s| s.to_string()).collect();
        self
    }

    fn ordered_by(mut self, ordering: &[&str]) -> Self {
        self.ordering = ordering.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// AdminSite
///
/// Site headers and the registered model list. Built at startup and passed
/// into the composition root instead of living in global state.
#[derive(Clone, Debug, Serialize, Deserialize, TS, ToSchema, PartialEq)]
#[ts(export)]
pub struct AdminSite {
    pub site_header: String,
    pub site_title: String,
    pub index_title: String,
    pub models: Vec<ModelAdmin>,
}

impl AdminSite {
    pub fn new(site_header: String, site_title: String, index_title: String, page_size: i64) -> Self {
        let models = vec![
            ModelAdmin::new("Author", page_size)
                .columns(&["name"])
                .search(&["name"])
                .ordered_by(&["name"]),
            ModelAdmin::new("Book", page_size)
                .columns(&["title", "author", "publication_year"])
                .filters(&["author", "publication_year", "is_available", "language"])
                .search(&["title", "author"])
                .ordered_by(&["title"]),
            ModelAdmin::new("Library", page_size)
                .columns(&["name", "location"])
                .search(&["name", "location"])
                .ordered_by(&["name"]),
            ModelAdmin::new("Librarian", page_size)
                .columns(&["name", "library"])
                .search(&["name"])
                .ordered_by(&["name"]),
            ModelAdmin::new("UserProfile", page_size)
                .columns(&[
                    "username",
                    "role",
                    "email",
                    "date_of_birth",
                    "profile_photo",
                    "date_joined",
                ])
                .filters(&["role"])
                .search(&["username", "email"])
                .ordered_by(&["username"]),
        ];
        Self {
            site_header,
            site_title,
            index_title,
            models,
        }
    }
}

impl Default for AppConfig {
    /// Non-panicking configuration for tests: local env, in-memory store.
    fn default() -> Self {
        Self {
            env: Env::Local,
            db_url: None,
            jwt_secret: LOCAL_JWT_SECRET.to_string(),
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            bind_addr: "0.0.0.0:3000".to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            seed_demo_data: false,
            site: default_site(DEFAULT_PAGE_SIZE),
        }
    }
}

fn default_site(page_size: i64) -> AdminSite {
    AdminSite::new(
        "Library Management System Admin".to_string(),
        "LMS Admin".to_string(),
        "Role-Based Access Control Administration".to_string(),
        page_size,
    )
}

impl AppConfig {
    /// load
    ///
    /// Reads the configuration from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// from_lookup
    ///
    /// Builds the configuration from any key lookup. Production refuses to
    /// start without `DATABASE_URL` and `JWT_SECRET`; local falls back to the
    /// in-memory store and a fixed development secret.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = match lookup("APP_ENV").as_deref() {
            Some("production") => Env::Production,
            _ => Env::Local,
        };

        let db_url = lookup("DATABASE_URL").filter(|url| !url.is_empty());
        let jwt_secret = lookup("JWT_SECRET").filter(|s| !s.is_empty());

        let (db_url, jwt_secret) = match env {
            Env::Production => (
                Some(db_url.ok_or(ConfigError::Missing("DATABASE_URL"))?),
                jwt_secret.ok_or(ConfigError::Missing("JWT_SECRET"))?,
            ),
            Env::Local => (
                db_url,
                jwt_secret.unwrap_or_else(|| LOCAL_JWT_SECRET.to_string()),
            ),
        };

        let token_ttl_secs = parse_bounded(
            &lookup,
            "TOKEN_TTL_SECS",
            DEFAULT_TOKEN_TTL_SECS,
            1..=MAX_TOKEN_TTL_SECS,
        )?;
        let page_size = parse_bounded(&lookup, "PAGE_SIZE", DEFAULT_PAGE_SIZE, 1..=MAX_PAGE_SIZE)?;

        let seed_demo_data = matches!(
            lookup("SEED_DEMO_DATA").as_deref(),
            Some("1") | Some("true") | Some("yes")
        );

        let defaults = default_site(page_size);
        let site = AdminSite::new(
            lookup("SITE_HEADER").unwrap_or(defaults.site_header),
            lookup("SITE_TITLE").unwrap_or(defaults.site_title),
            lookup("INDEX_TITLE").unwrap_or(defaults.index_title),
            page_size,
        );

        Ok(Self {
            env,
            db_url,
            jwt_secret,
            token_ttl_secs,
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            page_size,
            seed_demo_data,
            site,
        })
    }
}

/// Parses an integer setting that must fall inside `bounds`.
fn parse_bounded<F>(
    lookup: &F,
    key: &'static str,
    default: i64,
    bounds: RangeInclusive<i64>,
) -> Result<i64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.parse::<i64>() {
        Ok(value) if bounds.contains(&value) => Ok(value),
        _ => Err(ConfigError::Invalid { key, value: raw }),
    }
}
