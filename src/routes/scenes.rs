// SPDX-License-Identifier: MIT
// Copyright 2026 Lumini contributors

//! Scene routes gated on the session and the active child profile.

use crate::avatars::{self, Avatar};
use crate::error::{AppError, Result};
use crate::middleware::auth::authenticate;
use crate::profile::ViewGate;
use crate::routes::api::ProfileView;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Serialize;
use std::sync::Arc;

pub const LOGIN_PATH: &str = "/login";
pub const PROFILE_SELECTION_PATH: &str = "/scenes/library";
pub const PARENT_UNLOCK_PATH: &str = "/parent/unlock";

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/scenes/{scene}", get(get_scene))
}

/// The navigable scenes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scene {
    Library,
    House,
    Classroom,
    Study,
    Games,
    Activities,
    Closet,
    Parent,
}

impl Scene {
    pub const ALL: [Scene; 8] = [
        Scene::Library,
        Scene::House,
        Scene::Classroom,
        Scene::Study,
        Scene::Games,
        Scene::Activities,
        Scene::Closet,
        Scene::Parent,
    ];

    pub fn slug(self) -> &'static str {
        match self {
            Scene::Library => "library",
            Scene::House => "house",
            Scene::Classroom => "classroom",
            Scene::Study => "study",
            Scene::Games => "games",
            Scene::Activities => "activities",
            Scene::Closet => "closet",
            Scene::Parent => "parent",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.slug() == slug)
    }

    fn title(self) -> &'static str {
        match self {
            Scene::Library => "Biblioteca",
            Scene::House => "Casa",
            Scene::Classroom => "Salón",
            Scene::Study => "Estudio",
            Scene::Games => "Juegos",
            Scene::Activities => "Actividades",
            Scene::Closet => "Closet",
            Scene::Parent => "Panel de padres",
        }
    }

    fn background(self) -> Option<&'static str> {
        match self {
            Scene::House => Some("/casa/fondo.jpg"),
            Scene::Classroom => Some("/salon/fondo.jpg"),
            Scene::Study => Some("/estudio/tabla.png"),
            Scene::Games => Some("/juego/fondo.png"),
            Scene::Activities => Some("/actividades/fondo.jpg"),
            Scene::Closet => Some("/closet/fondo.png"),
            Scene::Library | Scene::Parent => None,
        }
    }

    /// Scenes reachable from this one.
    fn links(self) -> &'static [Scene] {
        match self {
            Scene::Library => &[Scene::Activities, Scene::Parent],
            Scene::Activities => &[Scene::House, Scene::Classroom, Scene::Games, Scene::Library],
            Scene::House => &[Scene::Closet, Scene::Activities],
            Scene::Closet => &[Scene::House],
            Scene::Classroom => &[Scene::Study, Scene::Activities],
            Scene::Study => &[Scene::Classroom],
            Scene::Games => &[Scene::Activities],
            Scene::Parent => &[Scene::Library],
        }
    }

    /// Library is the profile-selection scene and the parent dashboard
    /// manages profiles; neither needs an active one.
    fn requires_active_profile(self) -> bool {
        !matches!(self, Scene::Library | Scene::Parent)
    }
}

/// Scene payload rendered by the client.
#[derive(Serialize)]
pub struct SceneResponse {
    pub scene: &'static str,
    pub title: &'static str,
    pub background: Option<&'static str>,
    pub links: Vec<String>,
    pub active_profile: Option<ProfileView>,
    /// Character portrait for the active profile's sex
    pub portrait: Option<&'static str>,
    /// Roster, for the library and parent scenes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profiles: Option<Vec<ProfileView>>,
    /// Avatar catalog, for the library scene
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatars: Option<&'static [Avatar]>,
}

fn loading_response() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        [(header::RETRY_AFTER, "1")],
        Json(serde_json::json!({ "error": "loading" })),
    )
        .into_response()
}

async fn get_scene(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Result<Response> {
    let scene =
        Scene::from_slug(&slug).ok_or_else(|| AppError::NotFound(format!("Scene {}", slug)))?;

    let snapshot = state.profiles.snapshot();
    let gate = ViewGate::evaluate(&snapshot);

    let active = match gate {
        ViewGate::Loading => return Ok(loading_response()),
        ViewGate::SignIn => return Ok(Redirect::temporary(LOGIN_PATH).into_response()),
        ViewGate::SelectProfile if scene.requires_active_profile() => {
            return Ok(Redirect::temporary(PROFILE_SELECTION_PATH).into_response())
        }
        ViewGate::SelectProfile => None,
        ViewGate::Ready(profile) => Some(profile),
    };

    // The signed-in session must belong to this client.
    let Some(uid) = authenticate(&state, &jar, &headers) else {
        return Ok(Redirect::temporary(LOGIN_PATH).into_response());
    };

    if snapshot.account.as_ref() != Some(&uid) {
        tracing::warn!(account = %uid, "Scene requested while profile state belongs to another account");
        return Ok(Redirect::temporary(LOGIN_PATH).into_response());
    }

    if scene == Scene::Parent && !state.parent_access.is_unlocked(&uid) {
        return Ok(Redirect::temporary(PARENT_UNLOCK_PATH).into_response());
    }

    let with_roster = matches!(scene, Scene::Library | Scene::Parent);
    let response = SceneResponse {
        scene: scene.slug(),
        title: scene.title(),
        background: scene.background(),
        links: scene
            .links()
            .iter()
            .map(|s| format!("/scenes/{}", s.slug()))
            .collect(),
        portrait: active.as_ref().map(|p| avatars::scene_portrait(p.sex)),
        active_profile: active.as_ref().map(ProfileView::from),
        profiles: with_roster.then(|| {
            state
                .profiles
                .profiles()
                .iter()
                .map(ProfileView::from)
                .collect()
        }),
        avatars: (scene == Scene::Library).then_some(&avatars::AVATARS[..]),
    };

    tracing::debug!(scene = scene.slug(), account = %uid, "Rendering scene");
    Ok(Json(response).into_response())
}
