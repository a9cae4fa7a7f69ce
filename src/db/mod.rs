// SPDX-License-Identifier: MIT
// Copyright 2026 Lumini contributors

//! Database layer (Firestore, or in-memory for local use).

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreDb;
pub use memory::MemoryDb;

use crate::error::AppError;
use crate::models::{AccountId, ChildProfile, NewChildProfile, ProfilePatch, User};
use crate::profile::store::{ProfileError, ProfileStore};

/// Collection names as constants.
pub mod collections {
    pub const USERS: &str = "users";
    /// Subcollection of a user document
    pub const CHILDREN: &str = "children";
}

/// Storage backend selected at startup.
#[derive(Clone)]
pub enum Backend {
    Firestore(FirestoreDb),
    Memory(MemoryDb),
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Firestore(_) => "firestore",
            Backend::Memory(_) => "memory",
        }
    }

    pub async fn get_user(&self, uid: &AccountId) -> Result<Option<User>, AppError> {
        match self {
            Backend::Firestore(db) => db.get_user(uid).await,
            Backend::Memory(db) => db.get_user(uid).await,
        }
    }

    pub async fn upsert_user(&self, uid: &AccountId, user: &User) -> Result<(), AppError> {
        match self {
            Backend::Firestore(db) => db.upsert_user(uid, user).await,
            Backend::Memory(db) => db.upsert_user(uid, user).await,
        }
    }

    pub async fn set_parent_password_hash(
        &self,
        uid: &AccountId,
        hash: &str,
    ) -> Result<(), AppError> {
        match self {
            Backend::Firestore(db) => db.set_parent_password_hash(uid, hash).await,
            Backend::Memory(db) => db.set_parent_password_hash(uid, hash).await,
        }
    }
}

impl ProfileStore for Backend {
    async fn list(&self, account: &AccountId) -> Result<Vec<ChildProfile>, ProfileError> {
        match self {
            Backend::Firestore(db) => db.list(account).await,
            Backend::Memory(db) => db.list(account).await,
        }
    }

    async fn create(
        &self,
        account: &AccountId,
        data: NewChildProfile,
    ) -> Result<ChildProfile, ProfileError> {
        match self {
            Backend::Firestore(db) => db.create(account, data).await,
            Backend::Memory(db) => db.create(account, data).await,
        }
    }

    async fn update(
        &self,
        account: &AccountId,
        id: &str,
        patch: &ProfilePatch,
    ) -> Result<(), ProfileError> {
        match self {
            Backend::Firestore(db) => db.update(account, id, patch).await,
            Backend::Memory(db) => db.update(account, id, patch).await,
        }
    }

    async fn delete(&self, account: &AccountId, id: &str) -> Result<(), ProfileError> {
        match self {
            Backend::Firestore(db) => db.delete(account, id).await,
            Backend::Memory(db) => db.delete(account, id).await,
        }
    }
}
