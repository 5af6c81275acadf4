use std::collections::HashMap;

use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::repository::RepositoryError;

/// Result type for handler operations.
pub type ApiResult<T> = Result<T, ApiError>;

/// ApiError
///
/// Every failure a request can end in. Errors are handled at the point of
/// occurrence and never outlive the request that produced them.
#[derive(Debug, Error)]
pub enum ApiError {
    // 400
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation failed")]
    ValidationError(HashMap<String, Vec<String>>),

    #[error("Invalid query parameter: {0}")]
    InvalidQueryParam(String),

    // 401
    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid credentials")]
    InvalidCredentials,

    // 403
    #[error("Access denied")]
    Forbidden,

    // 404
    #[error("{0} not found")]
    NotFound(&'static str),

    // 409
    #[error("Conflict: {0}")]
    Conflict(String),

    // 500
    #[error("Internal server error")]
    Internal(String),

    #[error("Database error")]
    Database(#[source] sqlx::Error),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::ValidationError(_) | Self::InvalidQueryParam(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Unauthorized | Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) | Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for clients.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::ValidationError(_) => "validation_error",
            Self::InvalidQueryParam(_) => "invalid_query_param",
            Self::Unauthorized => "unauthorized",
            Self::InvalidCredentials => "invalid_credentials",
            Self::Forbidden => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Internal(_) => "internal_error",
            Self::Database(_) => "database_error",
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<HashMap<String, Vec<String>>>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = ?self, code = self.error_code(), "server error");
        } else if matches!(
            self,
            ApiError::Unauthorized | ApiError::InvalidCredentials | ApiError::Forbidden
        ) {
            tracing::warn!(error = %self, code = self.error_code(), "auth error");
        }

        let fields = match &self {
            ApiError::ValidationError(fields) => Some(fields.clone()),
            _ => None,
        };

        // Display never includes the wrapped source, so internal details stay in the logs.
        let body = ErrorResponse {
            success: false,
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                fields,
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Conflict(msg) => ApiError::Conflict(msg),
            RepositoryError::InvalidReference(msg) => ApiError::BadRequest(msg),
            RepositoryError::Database(e) => ApiError::Database(e),
        }
    }
}

// Extractor rejections keep axum's message but travel in the JSON envelope.

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::InvalidQueryParam(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        let fields = errors
            .field_errors()
            .into_iter()
            .map(|(field, errs)| {
                let messages = errs
                    .iter()
                    .map(|e| match &e.message {
                        Some(msg) => msg.to_string(),
                        None => e.code.to_string(),
                    })
                    .collect();
                (field.to_string(), messages)
            })
            .collect();
        ApiError::ValidationError(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[derive(Validate)]
    struct Form {
        #[validate(length(min = 1, message = "must not be empty"))]
        name: String,
    }

    #[test]
    fn status_codes_follow_error_kind() {
        assert_eq!(ApiError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::NotFound("Book").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::Conflict("isbn".into()).status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn validation_errors_become_field_map() {
        let err: ApiError = Form { name: String::new() }.validate().unwrap_err().into();
        match err {
            ApiError::ValidationError(fields) => {
                assert_eq!(fields["name"], vec!["must not be empty".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn response_body_carries_code_and_fields() {
        let mut fields = HashMap::new();
        fields.insert("title".to_string(), vec!["too long".to_string()]);
        let response = ApiError::ValidationError(fields).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "validation_error");
        assert_eq!(json["error"]["fields"]["title"][0], "too long");
    }
}
