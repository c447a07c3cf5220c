use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// A single field-level validation failure.
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: &str) -> Self {
        Self {
            field: field.to_string(),
            message: message.to_string(),
        }
    }
}

/// Every failure a handler can surface. Infrastructure errors fold into
/// `Internal`; the status mapping lives in one place (`status`).
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Validation failed")]
    Validation(Vec<FieldError>),

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Access denied")]
    Forbidden,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Gone(String),

    #[error("Too many requests")]
    RateLimited {
        message: String,
        monthly_limit: Option<i64>,
        retry_after_secs: Option<u64>,
    },

    #[error("Internal server error")]
    Internal(anyhow::Error),

    #[error("{0}")]
    Unavailable(String),
}

impl ApiError {
    pub fn validation(field: &str, message: &str) -> Self {
        ApiError::Validation(vec![FieldError::new(field, message)])
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Gone(_) => StatusCode::GONE,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("request failed: {:#}", self);
        }

        let body = match &self {
            ApiError::Validation(errors) => json!({
                "message": "Validation failed",
                "errors": errors,
            }),
            ApiError::RateLimited {
                message,
                monthly_limit,
                ..
            } => match monthly_limit {
                Some(limit) => json!({ "message": message, "monthlyLimit": limit }),
                None => json!({ "message": message }),
            },
            // Generic bodies for 401/403/500: no detail leaks.
            ApiError::Unauthenticated => json!({ "message": "Authentication required" }),
            ApiError::Forbidden => json!({ "message": "Access denied" }),
            ApiError::Internal(_) => json!({ "message": "Internal server error" }),
            other => json!({ "message": other.to_string() }),
        };

        let mut response = (status, Json(body)).into_response();
        if let ApiError::RateLimited {
            retry_after_secs: Some(secs),
            ..
        } = &self
        {
            if let Ok(value) = secs.to_string().parse() {
                response.headers_mut().insert("X-RateLimit-Reset", value);
            }
        }
        response
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound("Record"),
            other => ApiError::Internal(other.into()),
        }
    }
}

impl From<redis::RedisError> for ApiError {
    fn from(err: redis::RedisError) -> Self {
        ApiError::Internal(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_is_stable() {
        assert_eq!(
            ApiError::validation("name", "required").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::Unauthenticated.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::NotFound("Patient").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::Conflict("email in use".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(ApiError::Gone("invite expired".into()).status(), StatusCode::GONE);
        assert_eq!(
            ApiError::RateLimited {
                message: "slow down".into(),
                monthly_limit: None,
                retry_after_secs: Some(30),
            }
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::Unavailable("queue down".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn not_found_message_does_not_leak_tenancy() {
        let err = ApiError::NotFound("Patient");
        assert_eq!(err.to_string(), "Patient not found");
    }
}
