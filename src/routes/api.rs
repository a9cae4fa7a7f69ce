// SPDX-License-Identifier: MIT
// Copyright 2026 Lumini contributors

//! API routes for the signed-in account: profile roster and active profile.

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::child::{MAX_CHILD_PROFILES, MAX_NAME_CHARS};
use crate::models::{AccountId, ChildProfile, LimitationType, NewChildProfile, ProfilePatch, Sex};
use crate::profile::{ProfileError, ProfileSnapshot};
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;
use validator::Validate;

/// Name length bound in the unit `validator` expects.
const NAME_MAX_LEN: u64 = MAX_NAME_CHARS as u64;

/// How long a request waits for an in-flight profile fetch.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

/// API routes (require authentication via JWT).
/// The auth middleware is applied in routes/mod.rs for these routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/me", get(get_me))
        .route("/api/profiles", get(list_profiles).post(create_profile))
        .route(
            "/api/profiles/active",
            get(get_active).put(select_active).patch(update_active),
        )
        .route(
            "/api/profiles/{id}",
            axum::routing::put(update_profile).delete(delete_profile),
        )
}

/// Wait until the controller has no fetch in flight.
pub(crate) async fn settled(state: &AppState) -> Result<ProfileSnapshot> {
    tokio::time::timeout(SETTLE_TIMEOUT, state.profiles.settled())
        .await
        .map_err(|_| {
            AppError::Profile(ProfileError::BackendUnavailable(
                "Timed out waiting for profiles".to_string(),
            ))
        })
}

/// Wait for the controller and check its state belongs to `uid`.
pub(crate) async fn settled_for(state: &AppState, uid: &AccountId) -> Result<ProfileSnapshot> {
    let snapshot = settled(state).await?;
    if snapshot.account.as_ref() != Some(uid) {
        tracing::warn!(
            account = %uid,
            controller_account = ?snapshot.account,
            "Profile state belongs to another account"
        );
        return Err(AppError::Unauthorized);
    }
    Ok(snapshot)
}

// ─── Current Account ─────────────────────────────────────────

/// Current account response.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct MeResponse {
    pub uid: String,
    pub email: String,
    pub name: Option<String>,
    pub has_parent_password: bool,
}

/// Get the signed-in account.
async fn get_me(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<MeResponse>> {
    let doc = state.db.get_user(&user.uid).await?;
    let email = match (&doc, state.session.account()) {
        (Some(doc), _) => doc.email.clone(),
        (None, Some(account)) => account.email,
        (None, None) => return Err(AppError::Unauthorized),
    };

    Ok(Json(MeResponse {
        uid: user.uid.to_string(),
        email,
        name: doc.as_ref().and_then(|d| d.name.clone()),
        has_parent_password: doc
            .as_ref()
            .is_some_and(|d| d.parent_password_hash.is_some()),
    }))
}

// ─── Profiles ────────────────────────────────────────────────

/// Child profile as returned to clients, with its resolved avatar.
#[derive(Debug, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ProfileView {
    pub id: Option<String>,
    pub name: String,
    pub sex: Sex,
    pub limitation_type: LimitationType,
    pub avatar_id: Option<u32>,
    pub avatar_src: String,
}

impl From<&ChildProfile> for ProfileView {
    fn from(profile: &ChildProfile) -> Self {
        Self {
            id: profile.id.clone(),
            name: profile.name.clone(),
            sex: profile.sex,
            limitation_type: profile.limitation_type,
            avatar_id: profile.avatar_id,
            avatar_src: profile.avatar_src().to_string(),
        }
    }
}

/// Profile roster response.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ProfilesResponse {
    pub profiles: Vec<ProfileView>,
    pub active_id: Option<String>,
    pub max_profiles: usize,
}

async fn list_profiles(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<ProfilesResponse>> {
    let snapshot = settled_for(&state, &user.uid).await?;
    let profiles = state.profiles.profiles();

    Ok(Json(ProfilesResponse {
        profiles: profiles.iter().map(ProfileView::from).collect(),
        active_id: snapshot.active.and_then(|p| p.id),
        max_profiles: MAX_CHILD_PROFILES,
    }))
}

/// Request body for creating a profile.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateProfileRequest {
    #[validate(length(min = 1, max = NAME_MAX_LEN))]
    pub name: String,
    pub sex: Sex,
    #[serde(default)]
    pub limitation_type: LimitationType,
    pub avatar_id: Option<u32>,
}

async fn create_profile(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateProfileRequest>,
) -> Result<(StatusCode, Json<ProfileView>)> {
    req.validate()?;
    settled_for(&state, &user.uid).await?;

    let created = state
        .profiles
        .create_profile(NewChildProfile {
            name: req.name,
            sex: req.sex,
            limitation_type: req.limitation_type,
            avatar_id: req.avatar_id,
        })
        .await?;

    tracing::info!(account = %user.uid, profile = ?created.id, "Child profile created via API");
    Ok((StatusCode::CREATED, Json(ProfileView::from(&created))))
}

async fn update_profile(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(patch): Json<ProfilePatch>,
) -> Result<Json<ProfileView>> {
    settled_for(&state, &user.uid).await?;
    let updated = state.profiles.update_profile(&id, patch).await?;
    Ok(Json(ProfileView::from(&updated)))
}

async fn delete_profile(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    settled_for(&state, &user.uid).await?;
    state.profiles.delete_profile(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ─── Active Profile ──────────────────────────────────────────

/// Active profile response.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ActiveProfileResponse {
    pub active: Option<ProfileView>,
}

async fn get_active(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<ActiveProfileResponse>> {
    let snapshot = settled_for(&state, &user.uid).await?;
    Ok(Json(ActiveProfileResponse {
        active: snapshot.active.as_ref().map(ProfileView::from),
    }))
}

/// Request body for selecting the active profile; `null` clears it.
#[derive(Debug, Deserialize)]
pub struct SelectActiveRequest {
    pub id: Option<String>,
}

async fn select_active(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<SelectActiveRequest>,
) -> Result<Json<ActiveProfileResponse>> {
    settled_for(&state, &user.uid).await?;
    let active = match req.id {
        Some(id) => Some(state.profiles.select_profile(&id).await?),
        None => {
            state.profiles.set_active(None).await;
            None
        }
    };
    Ok(Json(ActiveProfileResponse {
        active: active.as_ref().map(ProfileView::from),
    }))
}

async fn update_active(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(patch): Json<ProfilePatch>,
) -> Result<Json<ProfileView>> {
    settled_for(&state, &user.uid).await?;
    let updated = state.profiles.update_active(patch).await?;
    Ok(Json(ProfileView::from(&updated)))
}
