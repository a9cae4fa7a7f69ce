// SPDX-License-Identifier: MIT
// Copyright 2026 Lumini contributors

//! Lumini application server
//!
//! Serves the account, child-profile and scene API for one household.

use lumini::{
    config::{BackendKind, Config},
    db::{Backend, FirestoreDb, MemoryDb},
    profile::FileCache,
    services::IdentityService,
    AppState,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging
    init_logging();

    let config = Config::from_env().expect("Failed to load configuration");
    tracing::info!(port = config.port, backend = ?config.backend, "Starting Lumini");

    let (db, identity) = match config.backend {
        BackendKind::Firestore => {
            let db = FirestoreDb::new(&config.gcp_project_id)
                .await
                .expect("Failed to connect to Firestore");
            let identity = IdentityService::new(&config.firebase_api_key)
                .expect("Failed to initialize identity client");
            (Backend::Firestore(db), identity)
        }
        BackendKind::Memory => {
            tracing::warn!("Using in-memory backend; data is lost on restart");
            (Backend::Memory(MemoryDb::new()), IdentityService::new_mock())
        }
    };

    let cache = FileCache::open(&config.data_dir).expect("Failed to open local cache");
    let state = AppState::new(config.clone(), db, identity, Arc::new(cache));

    state.session.restore();

    let app = lumini::routes::create_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging.
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lumini=debug".parse().unwrap())
                .add_directive("info".parse().unwrap()),
        )
        .with(format)
        .init();
}
