use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Domain error for every handler. Carries the classification; the HTTP
/// status and machine-readable code derive from the variant.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed or out-of-policy request input.
    #[error("{0}")]
    InvalidBody(String),

    /// Uniqueness conflict surfaced by the persistence layer.
    #[error("{0}")]
    AlreadyExists(String),

    /// Missing, invalid or expired session credential.
    #[error("{0}")]
    Unauthenticated(String),

    /// Valid identity, wrong scope.
    #[error("{0}")]
    Forbidden(String),

    /// Payment provider unreachable or returned unusable data.
    #[error("{0}")]
    Upstream(String),

    /// Anything unanticipated. Detail is logged, never sent to the caller.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidBody(_) | ApiError::AlreadyExists(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidBody(_) => "invalid_body",
            ApiError::AlreadyExists(_) => "already_exists",
            ApiError::Unauthenticated(_) => "unauthenticated",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::Upstream(_) => "upstream_error",
            ApiError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            ApiError::Internal(e) => {
                error!(error = ?e, "unexpected error");
                "Something went wrong.".to_string()
            }
            other => other.to_string(),
        };
        let body = Json(json!({ "code": self.code(), "message": message }));
        (self.status(), body).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidBody(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::InvalidBody(rejection.body_text())
    }
}

/// True when `err` wraps a database unique-constraint violation.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<sqlx::Error>()
        .and_then(|e| e.as_database_error())
        .map(|db| db.is_unique_violation())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_match_taxonomy() {
        assert_eq!(
            ApiError::InvalidBody("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::AlreadyExists("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Unauthenticated("x".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ApiError::Forbidden("x".into()).status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::Upstream("x".into()).status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            ApiError::Internal(anyhow::anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(ApiError::InvalidBody("x".into()).code(), "invalid_body");
        assert_eq!(ApiError::AlreadyExists("x".into()).code(), "already_exists");
        assert_eq!(ApiError::Unauthenticated("x".into()).code(), "unauthenticated");
        assert_eq!(ApiError::Forbidden("x".into()).code(), "forbidden");
        assert_eq!(ApiError::Upstream("x".into()).code(), "upstream_error");
    }

    #[tokio::test]
    async fn response_body_is_structured_json() {
        let res = ApiError::AlreadyExists("A user with this email already exists.".into())
            .into_response();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .expect("read body");
        let v: serde_json::Value = serde_json::from_slice(&bytes).expect("json body");
        assert_eq!(v["code"], "already_exists");
        assert_eq!(v["message"], "A user with this email already exists.");
    }

    #[tokio::test]
    async fn internal_errors_never_leak_detail() {
        let res = ApiError::Internal(anyhow::anyhow!("connection refused to 10.0.0.3"))
            .into_response();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .expect("read body");
        let v: serde_json::Value = serde_json::from_slice(&bytes).expect("json body");
        assert_eq!(v["code"], "internal_error");
        assert!(!v["message"].as_str().unwrap().contains("10.0.0.3"));
    }
}
