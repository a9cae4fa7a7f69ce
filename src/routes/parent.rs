// SPDX-License-Identifier: MIT
// Copyright 2026 Lumini contributors

//! Parent-area password routes.

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::User;
use crate::services::parent_access::MIN_PARENT_PASSWORD_CHARS;
use crate::time_utils::now_rfc3339;
use crate::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;
use validator::Validate;

/// Parent routes (require authentication via JWT).
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/parent/password", post(set_password))
        .route("/api/parent/unlock", post(unlock))
        .route("/api/parent/status", get(status))
}

#[derive(Debug, Deserialize, Validate)]
pub struct PasswordRequest {
    #[validate(length(min = MIN_PARENT_PASSWORD_CHARS))]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct UnlockRequest {
    pub password: String,
}

/// Parent-area state for the signed-in account.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ParentStatusResponse {
    pub has_password: bool,
    pub unlocked: bool,
}

async fn status(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<ParentStatusResponse>> {
    let doc = state.db.get_user(&user.uid).await?;
    Ok(Json(ParentStatusResponse {
        has_password: doc.is_some_and(|d| d.parent_password_hash.is_some()),
        unlocked: state.parent_access.is_unlocked(&user.uid),
    }))
}

/// Set the parent password once. Changing it is not supported.
async fn set_password(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<PasswordRequest>,
) -> Result<(StatusCode, Json<ParentStatusResponse>)> {
    req.validate()?;

    let doc = state.db.get_user(&user.uid).await?;
    if doc.as_ref().is_some_and(|d| d.parent_password_hash.is_some()) {
        return Err(AppError::Conflict(
            "Parent password is already set".to_string(),
        ));
    }

    let hash = state.parent_access.hash_password(&req.password)?;
    match doc {
        Some(_) => {
            state
                .db
                .set_parent_password_hash(&user.uid, &hash)
                .await?
        }
        None => {
            // Accounts registered elsewhere have no user document yet.
            let email = state
                .session
                .account()
                .map(|a| a.email)
                .ok_or(AppError::Unauthorized)?;
            let user_doc = User {
                email,
                name: None,
                parent_password_hash: Some(hash),
                created_at: now_rfc3339(),
            };
            state.db.upsert_user(&user.uid, &user_doc).await?
        }
    }

    tracing::info!(account = %user.uid, "Parent password set");
    state.parent_access.unlock(&user.uid);

    Ok((
        StatusCode::CREATED,
        Json(ParentStatusResponse {
            has_password: true,
            unlocked: true,
        }),
    ))
}

async fn unlock(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<UnlockRequest>,
) -> Result<Json<ParentStatusResponse>> {
    let stored = state
        .db
        .get_user(&user.uid)
        .await?
        .and_then(|d| d.parent_password_hash)
        .ok_or_else(|| AppError::NotFound("Parent password is not set".to_string()))?;

    if !state.parent_access.verify_password(&req.password, &stored) {
        tracing::info!(account = %user.uid, "Parent unlock rejected");
        return Err(AppError::Forbidden("Incorrect parent password".to_string()));
    }

    state.parent_access.unlock(&user.uid);
    Ok(Json(ParentStatusResponse {
        has_password: true,
        unlocked: true,
    }))
}
