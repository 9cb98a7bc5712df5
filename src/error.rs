/*
 * Responsibility
 * - Gateway-wide ApiError definition (AppError)
 * - IntoResponse implementation (HTTP status / JSON error body)
 * - Conversion of layer errors (pool / authz / store / oauth2) into a stable error code
 *
 * Backend-internal text never reaches the body. It is logged where the error is raised.
 */
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::services::auth::{CookieError, OAuth2Error, ProviderError};
use crate::services::authz::AuthzError;
use crate::services::pool::PoolError;
use crate::services::upstream::StoreError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("authentication required")]
    AuthenticationRequired,
    #[error("login attempt could not be verified, restart the login flow")]
    CsrfMismatch,
    #[error("authentication provider unavailable")]
    AuthenticationUnavailable,
    #[error("forbidden")]
    AuthorizationDenied,
    #[error("authorization backend unavailable")]
    AuthorizationBackendUnavailable,
    #[error("too many concurrent authorization checks")]
    PoolSaturated,
    #[error("request validation failed")]
    ValidationFailed { details: Vec<String> },
    #[error("{code}: {message}")]
    BadRequest { code: &'static str, message: String },
    #[error("not found: {resource}")]
    NotFound { resource: &'static str },
    #[error("conflict")]
    Conflict,
    #[error("upstream service error")]
    Upstream,
    #[error("internal server error")]
    Internal,
}

impl AppError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::BadRequest {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(resource: &'static str) -> Self {
        Self::NotFound { resource }
    }

    pub fn validation(details: Vec<String>) -> Self {
        Self::ValidationFailed { details }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::AuthenticationRequired | AppError::CsrfMismatch => StatusCode::UNAUTHORIZED,
            AppError::AuthorizationDenied => StatusCode::FORBIDDEN,
            AppError::AuthenticationUnavailable
            | AppError::AuthorizationBackendUnavailable
            | AppError::PoolSaturated => StatusCode::SERVICE_UNAVAILABLE,
            AppError::ValidationFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Conflict => StatusCode::CONFLICT,
            AppError::Upstream => StatusCode::BAD_GATEWAY,
            AppError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::AuthenticationRequired => "authentication_required",
            AppError::CsrfMismatch => "csrf_mismatch",
            AppError::AuthenticationUnavailable => "authentication_unavailable",
            AppError::AuthorizationDenied => "forbidden",
            AppError::AuthorizationBackendUnavailable => "authorization_unavailable",
            AppError::PoolSaturated => "pool_saturated",
            AppError::ValidationFailed { .. } => "validation_failed",
            AppError::BadRequest { code, .. } => *code,
            AppError::NotFound { .. } => "not_found",
            AppError::Conflict => "conflict",
            AppError::Upstream => "upstream_error",
            AppError::Internal => "internal_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        let (message, details) = match self {
            AppError::BadRequest { message, .. } => (message, Vec::new()),
            AppError::NotFound { resource } => (format!("{resource} not found."), Vec::new()),
            AppError::ValidationFailed { details } => {
                ("request validation failed".to_string(), details)
            }
            other => (other.to_string(), Vec::new()),
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code,
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<AuthzError> for AppError {
    fn from(e: AuthzError) -> Self {
        match e {
            AuthzError::Denied => AppError::AuthorizationDenied,
            AuthzError::Saturated => AppError::PoolSaturated,
            AuthzError::BackendUnavailable => AppError::AuthorizationBackendUnavailable,
        }
    }
}

impl From<PoolError> for AppError {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::Saturated => AppError::PoolSaturated,
            PoolError::Closed | PoolError::TaskDropped => AppError::Internal,
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(kind) => AppError::not_found(kind.singular()),
            StoreError::Conflict => AppError::Conflict,
            StoreError::InvalidPayload(message) => {
                AppError::bad_request("invalid_payload", message)
            }
            StoreError::Unconfigured(_) | StoreError::Transport(_) | StoreError::Status { .. } => {
                AppError::Upstream
            }
        }
    }
}

impl From<OAuth2Error> for AppError {
    fn from(e: OAuth2Error) -> Self {
        match e {
            OAuth2Error::CsrfMismatch => AppError::CsrfMismatch,
            OAuth2Error::Provider(ProviderError::Transport(_) | ProviderError::Discovery(_)) => {
                AppError::AuthenticationUnavailable
            }
            OAuth2Error::Provider(ProviderError::Status { status }) if status >= 500 => {
                AppError::AuthenticationUnavailable
            }
            OAuth2Error::Randomness => AppError::Internal,
            _ => AppError::AuthenticationRequired,
        }
    }
}

// Only raised while issuing cookies; a bad inbound cookie is an authentication failure.
impl From<CookieError> for AppError {
    fn from(e: CookieError) -> Self {
        tracing::error!(error = %e, "cookie could not be issued");
        AppError::Internal
    }
}
