use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::{AppConfig, Env},
    error::ApiError,
    policy::Role,
    repository::RepositoryState,
};

/// Claims
///
/// Payload of the bearer tokens issued by POST /login.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user's id.
    pub sub: Uuid,
    /// Session id. The token is only honored while this session row exists.
    pub sid: Uuid,
    pub exp: usize,
    pub iat: usize,
}

/// AuthUser
///
/// The resolved identity of an authenticated request. `role` is `None` when
/// the identity has no profile row.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub username: String,
    pub role: Option<Role>,
    /// `None` when resolved through the local development bypass.
    pub session_id: Option<Uuid>,
}

/// Hashes a password into an argon2 PHC string.
pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::Internal(format!("password hashing failed: {e}")))
}

/// Checks a password against a stored PHC string. Malformed hashes never verify.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// issue_token
///
/// Signs an HS256 token bound to `session_id`, valid until `expires_at`.
pub fn issue_token(
    config: &AppConfig,
    user_id: Uuid,
    session_id: Uuid,
    expires_at: DateTime<Utc>,
) -> Result<String, ApiError> {
    let claims = Claims {
        sub: user_id,
        sid: session_id,
        iat: Utc::now().timestamp().max(0) as usize,
        exp: expires_at.timestamp().max(0) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(format!("token signing failed: {e}")))
}

/// Session expiry for a token issued now.
pub fn session_expiry(config: &AppConfig) -> Result<DateTime<Utc>, ApiError> {
    Duration::try_seconds(config.token_ttl_secs)
        .and_then(|ttl| Utc::now().checked_add_signed(ttl))
        .ok_or_else(|| {
            ApiError::Internal(format!("token ttl out of range: {}", config.token_ttl_secs))
        })
}

/// AuthUser Extractor
///
/// Resolves the acting identity for protected routes:
/// 1. Local bypass: in `Env::Local`, an `x-user-id` header naming an existing
///    user is accepted as-is.
/// 2. Bearer token: decoded and validated (signature + expiry).
/// 3. Session lookup: the `sid` claim must name a live session of `sub`.
/// 4. Account lookup: the identity must still exist; its role is loaded fresh.
///
/// Any failure rejects with 401.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let repo = RepositoryState::from_ref(state);
        let config = AppConfig::from_ref(state);

        if config.env == Env::Local {
            let bypass = parts
                .headers
                .get("x-user-id")
                .and_then(|value| value.to_str().ok())
                .and_then(|id| Uuid::parse_str(id).ok());
            if let Some(user_id) = bypass {
                if let Some(account) = repo.get_account(user_id).await? {
                    return Ok(AuthUser {
                        id: account.id,
                        username: account.username,
                        role: account.role,
                        session_id: None,
                    });
                }
            }
        }

        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or(ApiError::Unauthorized)?;

        let mut validation = Validation::default();
        validation.validate_exp = true;
        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            &validation,
        )
        .map_err(|e| {
            tracing::debug!(error = %e, "rejected bearer token");
            ApiError::Unauthorized
        })?
        .claims;

        let session = repo
            .get_session(claims.sid)
            .await?
            .filter(|s| s.user_id == claims.sub && !s.is_expired(Utc::now()))
            .ok_or(ApiError::Unauthorized)?;

        let account = repo
            .get_account(claims.sub)
            .await?
            .ok_or(ApiError::Unauthorized)?;

        Ok(AuthUser {
            id: account.id,
            username: account.username,
            role: account.role,
            session_id: Some(session.id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_round_trip() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
        assert!(!verify_password("correct horse", "not-a-phc-string"));
    }

    #[test]
    fn oversized_ttl_is_an_error_not_a_panic() {
        let config = AppConfig {
            token_ttl_secs: i64::MAX,
            ..AppConfig::default()
        };
        assert!(matches!(session_expiry(&config), Err(ApiError::Internal(_))));

        let expiry = session_expiry(&AppConfig::default()).unwrap();
        assert!(expiry > Utc::now());
    }

    #[test]
    fn issued_token_decodes_with_same_secret() {
        let config = AppConfig::default();
        let user_id = Uuid::new_v4();
        let session_id = Uuid::new_v4();
        let token = issue_token(&config, user_id, session_id, session_expiry(&config).unwrap()).unwrap();

        let data = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .unwrap();
        assert_eq!(data.claims.sub, user_id);
        assert_eq!(data.claims.sid, session_id);

        let wrong = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(b"another-secret"),
            &Validation::default(),
        );
        assert!(wrong.is_err());
    }
}
