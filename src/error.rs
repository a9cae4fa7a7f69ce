// SPDX-License-Identifier: MIT
// Copyright 2026 Lumini contributors

//! Application error types with consistent API responses.

use crate::profile::ProfileError;
use crate::services::identity::IdentityError;
use crate::services::parent_access::ParentAccessError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::BadRequest(errors.to_string())
    }
}

impl From<ParentAccessError> for AppError {
    fn from(e: ParentAccessError) -> Self {
        match e {
            ParentAccessError::TooShort => AppError::BadRequest(e.to_string()),
            other => AppError::Internal(anyhow::anyhow!(other)),
        }
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", Some(msg.clone())),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
            }
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", Some(msg.clone())),
            AppError::Profile(err) => match err {
                ProfileError::LimitExceeded { .. } => {
                    (StatusCode::CONFLICT, "limit_exceeded", Some(err.to_string()))
                }
                ProfileError::NotFound(id) => {
                    (StatusCode::NOT_FOUND, "not_found", Some(id.clone()))
                }
                ProfileError::NoActiveProfile => (
                    StatusCode::PRECONDITION_FAILED,
                    "no_active_profile",
                    None,
                ),
                ProfileError::NotSignedIn => (StatusCode::UNAUTHORIZED, "unauthorized", None),
                ProfileError::Invalid(msg) => {
                    (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
                }
                ProfileError::BackendUnavailable(msg) => {
                    tracing::error!(error = %msg, "Profile backend unavailable");
                    (StatusCode::SERVICE_UNAVAILABLE, "backend_unavailable", None)
                }
            },
            AppError::Identity(err) => match err {
                IdentityError::EmailExists => (StatusCode::CONFLICT, "email_exists", None),
                IdentityError::InvalidCredentials => {
                    (StatusCode::UNAUTHORIZED, "invalid_credentials", None)
                }
                IdentityError::WeakPassword(msg) => {
                    (StatusCode::BAD_REQUEST, "weak_password", Some(msg.clone()))
                }
                IdentityError::Unavailable(msg) => {
                    tracing::error!(error = %msg, "Identity service unavailable");
                    (StatusCode::SERVICE_UNAVAILABLE, "identity_unavailable", None)
                }
            },
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
