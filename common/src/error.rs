//! The error taxonomy every HTTP surface maps onto. The gateway never
//! retries on the caller's behalf; it classifies and surfaces.

use ambient_types::validation::FieldError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use owo_colors::OwoColorize;
use serde_json::json;
use uuid::Uuid;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("validation failed")]
    Validation(Vec<FieldError>),

    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// An operation that would violate a model invariant, e.g. a
    /// transition out of a terminal phase without a resume.
    #[error("{0}")]
    Invariant(String),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("cluster API unavailable: {0}")]
    Upstream(String),

    #[error("cluster API timed out: {0}")]
    UpstreamTimeout(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(errors: Vec<FieldError>) -> Self {
        ApiError::Validation(errors)
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Invariant(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Classifies errors from the cluster API. Authorization failures on the
/// underlying call surface as their HTTP analogues; everything else is
/// an upstream availability problem, never an implicit allow.
impl From<kube::Error> for ApiError {
    fn from(e: kube::Error) -> Self {
        match e {
            kube::Error::Api(ae) => match ae.code {
                401 => ApiError::Unauthenticated(ae.message),
                403 => ApiError::Forbidden(ae.message),
                404 => ApiError::NotFound(ae.message),
                409 => ApiError::Conflict(ae.message),
                422 => ApiError::Invariant(ae.message),
                429 => ApiError::RateLimited,
                _ => ApiError::Upstream(ae.message),
            },
            other => ApiError::Upstream(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::Validation(errors) => json!({
                "reason": "validation failed",
                "errors": errors
                    .iter()
                    .map(|e| json!({"field": e.field, "message": e.message}))
                    .collect::<Vec<_>>(),
            }),
            ApiError::Internal(message) => {
                let correlation_id = Uuid::new_v4();
                tracing::error!(%correlation_id, %message, "internal error");
                eprintln!(
                    "❌ {}",
                    format!("internal error [{correlation_id}]: {message}").red()
                );
                json!({"reason": "internal error", "correlationId": correlation_id})
            }
            other => json!({"reason": other.to_string()}),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_err(code: u16) -> kube::Error {
        kube::Error::Api(Box::new(kube::core::ErrorResponse {
            status: Some(kube::core::response::StatusSummary::Failure),
            message: format!("code {code}"),
            metadata: None,
            reason: String::new(),
            details: None,
            code,
        }))
    }

    #[test]
    fn kube_errors_map_to_taxonomy() {
        assert_eq!(ApiError::from(api_err(401)).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::from(api_err(403)).status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::from(api_err(404)).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::from(api_err(409)).status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::from(api_err(500)).status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn validation_carries_field_messages() {
        let err = ApiError::Validation(vec![FieldError {
            field: "timeout".to_string(),
            message: "out of range".to_string(),
        }]);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
