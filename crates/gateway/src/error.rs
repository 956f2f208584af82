//! Error types for the gateway layer

use axum::{
    extract::{
        multipart::MultipartError,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use portal_auth::AuthError;
use portal_database::DatabaseError;
use portal_services::{payment_gateway::GatewayClientError, ServiceError, StorageError};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};
use utoipa::ToSchema;

/// Gateway error types
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("{0}")]
    AuthenticationFailed(String),

    #[error("{0}")]
    AuthorizationFailed(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    PaymentGateway(String),

    #[error("Payment processing is not configured")]
    ServiceUnavailable,

    /// The detail is logged, never returned.
    #[error("Internal server error")]
    InternalError(String),
}

/// Body of every error response
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
            GatewayError::AuthorizationFailed(_) => StatusCode::FORBIDDEN,
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Conflict(_) => StatusCode::CONFLICT,
            GatewayError::PaymentGateway(_) => StatusCode::BAD_GATEWAY,
            GatewayError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if let GatewayError::InternalError(detail) = &self {
            error!(%detail, "request failed");
        }

        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

impl From<ServiceError> for GatewayError {
    fn from(error: ServiceError) -> Self {
        match error {
            ServiceError::Validation(message) => GatewayError::InvalidRequest(message),
            ServiceError::Forbidden(message) => GatewayError::AuthorizationFailed(message),
            err @ ServiceError::NotFound(_) => GatewayError::NotFound(err.to_string()),
            err @ (ServiceError::InvalidTransition { .. }
            | ServiceError::AlreadySigned
            | ServiceError::Conflict(_)) => GatewayError::Conflict(err.to_string()),
            ServiceError::Auth(err) => err.into(),
            ServiceError::Storage(err) => err.into(),
            ServiceError::PaymentGateway(err) => err.into(),
            ServiceError::Database(err) => err.into(),
            ServiceError::Internal(detail) => GatewayError::InternalError(detail),
        }
    }
}

impl From<AuthError> for GatewayError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::UserExists => {
                GatewayError::Conflict("An account with this email already exists".to_string())
            }
            AuthError::InvalidCredentials => {
                GatewayError::AuthenticationFailed("Invalid email or password".to_string())
            }
            AuthError::AccountDisabled => {
                GatewayError::AuthenticationFailed("Account is disabled".to_string())
            }
            AuthError::TokenExpired => {
                GatewayError::AuthenticationFailed("Token has expired".to_string())
            }
            AuthError::InvalidToken(_) | AuthError::InvalidSession => {
                GatewayError::AuthenticationFailed("Invalid token".to_string())
            }
            err @ (AuthError::InvalidResetToken | AuthError::InvalidVerificationToken) => {
                GatewayError::InvalidRequest(err.to_string())
            }
            AuthError::Validation(err) => GatewayError::InvalidRequest(err.0),
            AuthError::Database(err) => err.into(),
            err @ (AuthError::TokenCreation(_) | AuthError::PasswordHash(_)) => {
                GatewayError::InternalError(err.to_string())
            }
        }
    }
}

impl From<DatabaseError> for GatewayError {
    fn from(error: DatabaseError) -> Self {
        match error {
            DatabaseError::NotFound(what) => GatewayError::NotFound(format!("{what} not found")),
            DatabaseError::Duplicate(message) | DatabaseError::Conflict(message) => {
                GatewayError::Conflict(message)
            }
            DatabaseError::ValidationError(message) => GatewayError::InvalidRequest(message),
            other => GatewayError::InternalError(other.to_string()),
        }
    }
}

impl From<StorageError> for GatewayError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::NotFound(_) => GatewayError::NotFound("File not found".to_string()),
            StorageError::InvalidPath(path) => {
                GatewayError::InvalidRequest(format!("Invalid file path: {path}"))
            }
            other => GatewayError::InternalError(other.to_string()),
        }
    }
}

impl From<GatewayClientError> for GatewayError {
    fn from(error: GatewayClientError) -> Self {
        match error {
            GatewayClientError::NotConfigured => GatewayError::ServiceUnavailable,
            err @ (GatewayClientError::InvalidSignature | GatewayClientError::Malformed(_)) => {
                GatewayError::InvalidRequest(err.to_string())
            }
            err @ (GatewayClientError::Http(_) | GatewayClientError::Api { .. }) => {
                warn!(error = %err, "payment gateway call failed");
                GatewayError::PaymentGateway("Payment provider request failed".to_string())
            }
        }
    }
}

impl From<JsonRejection> for GatewayError {
    fn from(rejection: JsonRejection) -> Self {
        GatewayError::InvalidRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for GatewayError {
    fn from(rejection: QueryRejection) -> Self {
        GatewayError::InvalidRequest(rejection.body_text())
    }
}

impl From<MultipartError> for GatewayError {
    fn from(error: MultipartError) -> Self {
        GatewayError::InvalidRequest(format!("Invalid multipart body: {}", error.body_text()))
    }
}
