use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;
use utoipa::ToSchema;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{message}")]
    Validation {
        message: String,
        missing_fields: Vec<String>,
    },
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("Webhook signature verification failed")]
    InvalidSignature,
    #[error("Payment provider error: {0}")]
    PaymentProvider(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Fatal error: {0}")]
    Fatal(#[from] anyhow::Error),
}

impl Error {
    pub fn missing_fields(fields: Vec<String>) -> Self {
        Error::Validation {
            message: "Missing required fields".to_string(),
            missing_fields: fields,
        }
    }

    pub fn not_found(what: &str) -> Self {
        Error::NotFound(format!("{what} not found"))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::Validation { .. } | Error::BadRequest(_) | Error::InvalidSignature => {
                StatusCode::BAD_REQUEST
            }
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) | Error::Database(sqlx::Error::RowNotFound) => StatusCode::NOT_FOUND,
            Error::PaymentProvider(_) => StatusCode::BAD_GATEWAY,
            Error::Database(_) | Error::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JsonRejection> for Error {
    fn from(rejection: JsonRejection) -> Self {
        Error::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for Error {
    fn from(rejection: PathRejection) -> Self {
        Error::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for Error {
    fn from(rejection: QueryRejection) -> Self {
        Error::BadRequest(rejection.body_text())
    }
}

/// Body of every failed request.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_fields: Vec<String>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let (message, missing_fields) = match self {
            Error::Validation {
                message,
                missing_fields,
            } => (message, missing_fields),
            Error::Database(sqlx::Error::RowNotFound) => ("Resource not found".to_string(), vec![]),
            Error::Database(e) => {
                error!("database error: {}", e);
                ("Internal server error".to_string(), vec![])
            }
            Error::Fatal(e) => {
                error!("fatal error: {:?}", e);
                ("Internal server error".to_string(), vec![])
            }
            Error::PaymentProvider(e) => {
                error!("payment provider error: {}", e);
                ("Failed to reach payment provider".to_string(), vec![])
            }
            e => (e.to_string(), vec![]),
        };
        let body = ErrorBody {
            success: false,
            message,
            missing_fields,
        };
        (status, Json(body)).into_response()
    }
}
