// SPDX-License-Identifier: MIT
// Copyright 2026 Lumini contributors

//! In-process store with the same contract as the Firestore backend.
//!
//! Used for local development (`LUMINI_BACKEND=memory`) and in tests.

use crate::error::AppError;
use crate::models::child::MAX_CHILD_PROFILES;
use crate::models::{AccountId, ChildProfile, NewChildProfile, ProfilePatch, User};
use crate::profile::store::{ProfileError, ProfileStore};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct Inner {
    users: DashMap<AccountId, User>,
    children: DashMap<AccountId, Vec<ChildProfile>>,
    next_id: AtomicU64,
}

/// Memory-backed database. Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryDb {
    inner: Arc<Inner>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    // ─── User Operations ─────────────────────────────────────────

    pub async fn get_user(&self, uid: &AccountId) -> Result<Option<User>, AppError> {
        Ok(self.inner.users.get(uid).map(|u| u.value().clone()))
    }

    pub async fn upsert_user(&self, uid: &AccountId, user: &User) -> Result<(), AppError> {
        self.inner.users.insert(uid.clone(), user.clone());
        Ok(())
    }

    pub async fn set_parent_password_hash(
        &self,
        uid: &AccountId,
        hash: &str,
    ) -> Result<(), AppError> {
        let mut user = self
            .inner
            .users
            .get_mut(uid)
            .ok_or_else(|| AppError::NotFound(format!("User {}", uid)))?;
        user.parent_password_hash = Some(hash.to_string());
        Ok(())
    }
}

impl ProfileStore for MemoryDb {
    async fn list(&self, account: &AccountId) -> Result<Vec<ChildProfile>, ProfileError> {
        Ok(self
            .inner
            .children
            .get(account)
            .map(|c| c.value().clone())
            .unwrap_or_default())
    }

    async fn create(
        &self,
        account: &AccountId,
        data: NewChildProfile,
    ) -> Result<ChildProfile, ProfileError> {
        // The entry guard makes check-then-insert atomic per account.
        let mut children = self.inner.children.entry(account.clone()).or_default();
        if children.len() >= MAX_CHILD_PROFILES {
            return Err(ProfileError::LimitExceeded {
                limit: MAX_CHILD_PROFILES,
            });
        }

        let n = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut profile = data.into_profile();
        profile.id = Some(format!("child-{}", n));
        children.push(profile.clone());
        Ok(profile)
    }

    async fn update(
        &self,
        account: &AccountId,
        id: &str,
        patch: &ProfilePatch,
    ) -> Result<(), ProfileError> {
        let mut children = self
            .inner
            .children
            .get_mut(account)
            .ok_or_else(|| ProfileError::NotFound(id.to_string()))?;
        let profile = children
            .iter_mut()
            .find(|p| p.has_id(id))
            .ok_or_else(|| ProfileError::NotFound(id.to_string()))?;
        *profile = patch.apply_to(profile);
        Ok(())
    }

    async fn delete(&self, account: &AccountId, id: &str) -> Result<(), ProfileError> {
        let mut children = self
            .inner
            .children
            .get_mut(account)
            .ok_or_else(|| ProfileError::NotFound(id.to_string()))?;
        let before = children.len();
        children.retain(|p| !p.has_id(id));
        if children.len() == before {
            return Err(ProfileError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LimitationType, Sex};

    fn child(name: &str, sex: Sex) -> NewChildProfile {
        NewChildProfile {
            name: name.to_string(),
            sex,
            limitation_type: LimitationType::Adhd,
            avatar_id: None,
        }
    }

    #[tokio::test]
    async fn test_profiles_are_scoped_per_account() {
        let db = MemoryDb::new();
        let a = AccountId::new("a");
        let b = AccountId::new("b");

        let created = db.create(&a, child("Ana", Sex::Female)).await.unwrap();
        assert!(created.id.is_some());
        assert_eq!(created.avatar_id, Some(3));

        assert_eq!(db.list(&a).await.unwrap(), vec![created]);
        assert!(db.list(&b).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_enforces_cap() {
        let db = MemoryDb::new();
        let a = AccountId::new("a");
        for name in ["A", "B", "C"] {
            db.create(&a, child(name, Sex::Male)).await.unwrap();
        }
        let err = db.create(&a, child("D", Sex::Male)).await.unwrap_err();
        assert_eq!(err, ProfileError::LimitExceeded { limit: 3 });
        assert_eq!(db.list(&a).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_update_and_delete_unknown_ids() {
        let db = MemoryDb::new();
        let a = AccountId::new("a");
        let created = db.create(&a, child("Ana", Sex::Female)).await.unwrap();
        let id = created.id.unwrap();

        let patch = ProfilePatch {
            name: Some("Anita".to_string()),
            ..Default::default()
        };
        db.update(&a, &id, &patch).await.unwrap();
        assert_eq!(db.list(&a).await.unwrap()[0].name, "Anita");

        assert!(matches!(
            db.update(&a, "nope", &patch).await,
            Err(ProfileError::NotFound(_))
        ));
        // Another account cannot see the profile.
        assert!(matches!(
            db.delete(&AccountId::new("b"), &id).await,
            Err(ProfileError::NotFound(_))
        ));

        db.delete(&a, &id).await.unwrap();
        assert!(matches!(
            db.delete(&a, &id).await,
            Err(ProfileError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_parent_password_hash_requires_user() {
        let db = MemoryDb::new();
        let uid = AccountId::new("u1");
        assert!(db.set_parent_password_hash(&uid, "x$y").await.is_err());

        let user = User {
            email: "p@example.com".to_string(),
            name: None,
            parent_password_hash: None,
            created_at: "2026-01-01T00:00:00Z".to_string(),
        };
        db.upsert_user(&uid, &user).await.unwrap();
        db.set_parent_password_hash(&uid, "x$y").await.unwrap();

        let stored = db.get_user(&uid).await.unwrap().unwrap();
        assert_eq!(stored.parent_password_hash.as_deref(), Some("x$y"));
    }
}
