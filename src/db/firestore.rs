// SPDX-License-Identifier: MIT
// Copyright 2026 Lumini contributors

//! Firestore client wrapper with typed operations.
//!
//! Provides high-level operations for:
//! - Users (`users/{uid}`: registration data and parent password)
//! - Children (`users/{uid}/children/{id}`: child profiles)

use crate::db::collections;
use crate::error::AppError;
use crate::models::child::MAX_CHILD_PROFILES;
use crate::models::{AccountId, ChildProfile, NewChildProfile, ProfilePatch, User};
use crate::profile::store::{ProfileError, ProfileStore};
use firestore::errors::FirestoreError;
use firestore::FirestoreWritePrecondition;
use serde::{Deserialize, Serialize};

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
}

/// Masked write of the parent password field.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParentPasswordField {
    parent_password_hash: String,
}

fn unavailable(e: impl std::fmt::Display) -> ProfileError {
    ProfileError::BackendUnavailable(e.to_string())
}

/// Map a write error, treating a failed `exists` precondition as a missing document.
fn write_error(e: FirestoreError, id: &str) -> ProfileError {
    match e {
        FirestoreError::DataNotFoundError(_) => ProfileError::NotFound(id.to_string()),
        other => unavailable(other),
    }
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJlbXVsYXRvciJ9."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create an offline client for testing.
    ///
    /// All database operations will return an error if called.
    pub fn new_mock() -> Self {
        Self { client: None }
    }

    /// Helper to get the client or return an error if offline.
    fn get_client(&self) -> Result<&firestore::FirestoreDb, AppError> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Database("Database not connected (offline mode)".to_string()))
    }

    /// Client plus the `users/{uid}` parent path of the account's children.
    fn children_of(
        &self,
        account: &AccountId,
    ) -> Result<(&firestore::FirestoreDb, firestore::ParentPathBuilder), ProfileError> {
        let client = self.get_client().map_err(unavailable)?;
        let parent = client
            .parent_path(collections::USERS, account.as_str())
            .map_err(unavailable)?;
        Ok((client, parent))
    }

    // ─── User Operations ─────────────────────────────────────────

    /// Get the user document of an account.
    pub async fn get_user(&self, uid: &AccountId) -> Result<Option<User>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::USERS)
            .obj()
            .one(uid.as_str())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create or replace a user document.
    pub async fn upsert_user(&self, uid: &AccountId, user: &User) -> Result<(), AppError> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::USERS)
            .document_id(uid.as_str())
            .object(user)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Store the parent password digest, leaving other fields untouched.
    pub async fn set_parent_password_hash(
        &self,
        uid: &AccountId,
        hash: &str,
    ) -> Result<(), AppError> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .fields(["parentPasswordHash"])
            .in_col(collections::USERS)
            .precondition(FirestoreWritePrecondition::Exists(true))
            .document_id(uid.as_str())
            .object(&ParentPasswordField {
                parent_password_hash: hash.to_string(),
            })
            .execute()
            .await
            .map_err(|e| match e {
                FirestoreError::DataNotFoundError(_) => {
                    AppError::NotFound(format!("User {}", uid))
                }
                other => AppError::Database(other.to_string()),
            })?;
        Ok(())
    }
}

impl ProfileStore for FirestoreDb {
    async fn list(&self, account: &AccountId) -> Result<Vec<ChildProfile>, ProfileError> {
        let (client, parent) = self.children_of(account)?;
        client
            .fluent()
            .select()
            .from(collections::CHILDREN)
            .parent(&parent)
            .obj()
            .query()
            .await
            .map_err(unavailable)
    }

    async fn create(
        &self,
        account: &AccountId,
        data: NewChildProfile,
    ) -> Result<ChildProfile, ProfileError> {
        let existing = self.list(account).await?;
        if existing.len() >= MAX_CHILD_PROFILES {
            return Err(ProfileError::LimitExceeded {
                limit: MAX_CHILD_PROFILES,
            });
        }

        let (client, parent) = self.children_of(account)?;
        let profile = data.into_profile();
        let created: ChildProfile = client
            .fluent()
            .insert()
            .into(collections::CHILDREN)
            .generate_document_id()
            .parent(&parent)
            .object(&profile)
            .execute()
            .await
            .map_err(unavailable)?;

        tracing::debug!(account = %account, profile = ?created.id, "Child document created");
        Ok(created)
    }

    async fn update(
        &self,
        account: &AccountId,
        id: &str,
        patch: &ProfilePatch,
    ) -> Result<(), ProfileError> {
        let (client, parent) = self.children_of(account)?;
        let _: () = client
            .fluent()
            .update()
            .fields(patch.field_paths())
            .in_col(collections::CHILDREN)
            .precondition(FirestoreWritePrecondition::Exists(true))
            .document_id(id)
            .parent(&parent)
            .object(patch)
            .execute()
            .await
            .map_err(|e| write_error(e, id))?;
        Ok(())
    }

    async fn delete(&self, account: &AccountId, id: &str) -> Result<(), ProfileError> {
        let (client, parent) = self.children_of(account)?;
        client
            .fluent()
            .delete()
            .from(collections::CHILDREN)
            .document_id(id)
            .parent(&parent)
            .precondition(FirestoreWritePrecondition::Exists(true))
            .execute()
            .await
            .map_err(|e| write_error(e, id))?;
        Ok(())
    }
}
