// SPDX-License-Identifier: MIT
// Copyright 2026 Lumini contributors

//! Lumini: learning scenes for children, one active child profile at a time.
//!
//! This crate provides the local application server: accounts, the per-account
//! roster of child profiles, and the scene routes gated on the active profile.

pub mod avatars;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod profile;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::Backend;
use profile::{ActiveProfileController, LocalCache};
use services::{IdentityService, ParentAccess, SessionManager, Subscription};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub db: Backend,
    pub session: SessionManager,
    pub identity: IdentityService,
    pub parent_access: ParentAccess,
    pub profiles: Arc<ActiveProfileController<Backend>>,
    // Keeps the controller subscribed for the lifetime of the state.
    _session_subscription: Subscription,
}

impl AppState {
    /// Wire the controller to a session and build the shared state.
    ///
    /// The session starts out loading; call `session.restore()` to resolve it.
    pub fn new(
        config: Config,
        db: Backend,
        identity: IdentityService,
        cache: Arc<dyn LocalCache>,
    ) -> Arc<Self> {
        let session = SessionManager::persistent(cache.clone());
        let profiles = ActiveProfileController::new(db.clone(), cache);
        let subscription = profiles.attach(&session);
        let parent_access = ParentAccess::new(config.parent_password_key.clone());

        Arc::new(Self {
            config,
            db,
            session,
            identity,
            parent_access,
            profiles,
            _session_subscription: subscription,
        })
    }
}
