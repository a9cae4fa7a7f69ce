// SPDX-License-Identifier: MIT
// Copyright 2026 Lumini contributors

//! Application configuration loaded from environment variables.

use std::env;
use std::path::PathBuf;

/// Which store backs accounts and child profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Firestore,
    /// In-process store and mock identity service (no network)
    Memory,
}

impl std::str::FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "firestore" => Ok(BackendKind::Firestore),
            "memory" => Ok(BackendKind::Memory),
            _ => Err(ConfigError::Invalid("LUMINI_BACKEND", s.to_string())),
        }
    }
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Environment Variables (non-sensitive) ---
    /// Web API key of the Firebase project (Identity Toolkit)
    pub firebase_api_key: String,
    /// Frontend URL allowed by CORS
    pub frontend_url: String,
    /// GCP project ID
    pub gcp_project_id: String,
    /// Server port
    pub port: u16,
    /// Directory holding the local cache file
    pub data_dir: PathBuf,
    pub backend: BackendKind,

    // --- Secrets ---
    /// JWT signing key for session tokens (raw bytes)
    pub jwt_signing_key: Vec<u8>,
    /// HMAC key for parent password digests (raw bytes)
    pub parent_password_key: Vec<u8>,
}

impl Config {
    /// Load configuration from environment variables (and `.env` if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let backend: BackendKind = env::var("LUMINI_BACKEND")
            .unwrap_or_else(|_| "firestore".to_string())
            .parse()?;

        // The memory backend never calls Identity Toolkit.
        let firebase_api_key = match (env::var("FIREBASE_API_KEY"), backend) {
            (Ok(key), _) => key.trim().to_string(),
            (Err(_), BackendKind::Memory) => String::new(),
            (Err(_), BackendKind::Firestore) => {
                return Err(ConfigError::Missing("FIREBASE_API_KEY"))
            }
        };

        let port = match env::var("PORT") {
            Ok(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid("PORT", raw))?,
            Err(_) => 8080,
        };

        Ok(Self {
            firebase_api_key,
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            port,
            data_dir: env::var("LUMINI_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data")),
            backend,
            jwt_signing_key: env::var("JWT_SIGNING_KEY")
                .map_err(|_| ConfigError::Missing("JWT_SIGNING_KEY"))?
                .into_bytes(),
            parent_password_key: env::var("PARENT_PASSWORD_KEY")
                .map_err(|_| ConfigError::Missing("PARENT_PASSWORD_KEY"))?
                .into_bytes(),
        })
    }

    /// Config for tests: memory backend, fixed keys.
    pub fn test_default() -> Self {
        Self {
            firebase_api_key: String::new(),
            frontend_url: "http://localhost:5173".to_string(),
            gcp_project_id: "test-project".to_string(),
            port: 8080,
            data_dir: env::temp_dir().join("lumini-test"),
            backend: BackendKind::Memory,
            jwt_signing_key: b"test_jwt_key_32_bytes_minimum!!".to_vec(),
            parent_password_key: b"test_parent_password_key".to_vec(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}
