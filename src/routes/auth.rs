// SPDX-License-Identifier: MIT
// Copyright 2026 Lumini contributors

//! Email/password authentication routes.

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use crate::error::{AppError, Result};
use crate::middleware::auth::{create_jwt, SESSION_COOKIE, SESSION_TTL_SECS};
use crate::models::{Account, User};
use crate::routes::api::settled_for;
use crate::time_utils::now_rfc3339;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 6))]
    pub password: String,
    #[validate(length(max = 60))]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

/// Session response for register and login.
#[derive(Serialize)]
pub struct SessionResponse {
    pub uid: String,
    pub email: String,
    /// Whether a child profile is active after sign-in
    pub has_active_profile: bool,
}

fn session_cookie(token: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(SESSION_TTL_SECS as i64))
        .build()
}

/// Sign an account in: emit it on the session, wait for its profiles and
/// issue the session cookie.
async fn start_session(
    state: &AppState,
    jar: CookieJar,
    account: Account,
) -> Result<(CookieJar, Json<SessionResponse>)> {
    let token = match create_jwt(&account.uid, &state.config.jwt_signing_key) {
        Ok(token) => token,
        Err(e) => {
            abort_sign_in(state);
            return Err(e.into());
        }
    };

    let previous = state.session.state().account;
    if let Some(previous) = previous.filter(|p| *p != account.uid) {
        state.parent_access.lock(&previous);
    }

    state.session.sign_in(account.clone());
    // A concurrent sign-in may have replaced this account already.
    let snapshot = settled_for(state, &account.uid).await?;

    tracing::info!(account = %account.uid, active = snapshot.active.is_some(), "Session started");

    Ok((
        jar.add(session_cookie(token)),
        Json(SessionResponse {
            uid: account.uid.to_string(),
            email: account.email,
            has_active_profile: snapshot.active.is_some(),
        }),
    ))
}

/// Undo `begin_loading` after a failed identity call.
fn abort_sign_in(state: &AppState) {
    match state.session.account() {
        Some(account) => state.session.sign_in(account),
        None => state.session.sign_out(),
    }
}

async fn register(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, CookieJar, Json<SessionResponse>)> {
    req.validate()?;

    state.session.begin_loading();
    let account = match state.identity.sign_up(&req.email, &req.password).await {
        Ok(account) => account,
        Err(e) => {
            abort_sign_in(&state);
            return Err(e.into());
        }
    };

    let user = User {
        email: account.email.clone(),
        name: req
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty()),
        parent_password_hash: None,
        created_at: now_rfc3339(),
    };
    if let Err(e) = state.db.upsert_user(&account.uid, &user).await {
        abort_sign_in(&state);
        return Err(e);
    }

    let (jar, body) = start_session(&state, jar, account).await?;
    Ok((StatusCode::CREATED, jar, body))
}

async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<(CookieJar, Json<SessionResponse>)> {
    req.validate()?;

    state.session.begin_loading();
    let account = match state.identity.sign_in(&req.email, &req.password).await {
        Ok(account) => account,
        Err(e) => {
            abort_sign_in(&state);
            return Err(AppError::Identity(e));
        }
    };

    start_session(&state, jar, account).await
}

/// Sign out: clears the session, the cookie and any parent-area unlock.
async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> (CookieJar, StatusCode) {
    if let Some(account) = state.session.account() {
        state.parent_access.lock(&account.uid);
    }
    state.session.sign_out();
    (
        jar.remove(Cookie::build(SESSION_COOKIE).path("/")),
        StatusCode::NO_CONTENT,
    )
}
