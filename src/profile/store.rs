// SPDX-License-Identifier: MIT
// Copyright 2026 Lumini contributors

//! Remote child-profile store contract.

use crate::models::{AccountId, ChildProfile, NewChildProfile, ProfilePatch};
use std::future::Future;

/// Failures of profile operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProfileError {
    #[error("Profile backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Profile limit reached ({limit} per account)")]
    LimitExceeded { limit: usize },

    #[error("Profile not found: {0}")]
    NotFound(String),

    #[error("No active child profile")]
    NoActiveProfile,

    #[error("No account is signed in")]
    NotSignedIn,

    #[error("Invalid profile data: {0}")]
    Invalid(String),
}

/// Child-profile CRUD scoped to an account.
///
/// Each call is atomic from the caller's point of view: it either succeeds
/// with its result or fails without partial effects.
pub trait ProfileStore: Send + Sync + 'static {
    /// All profiles owned by the account, in a stable order.
    fn list(
        &self,
        account: &AccountId,
    ) -> impl Future<Output = Result<Vec<ChildProfile>, ProfileError>> + Send;

    /// Persist a new profile and return it with its assigned id.
    ///
    /// Fails with `LimitExceeded` when the account already owns the maximum.
    fn create(
        &self,
        account: &AccountId,
        data: NewChildProfile,
    ) -> impl Future<Output = Result<ChildProfile, ProfileError>> + Send;

    /// Apply a partial update. Fails with `NotFound` for unknown ids.
    fn update(
        &self,
        account: &AccountId,
        id: &str,
        patch: &ProfilePatch,
    ) -> impl Future<Output = Result<(), ProfileError>> + Send;

    /// Remove a profile. Fails with `NotFound` for unknown ids.
    fn delete(
        &self,
        account: &AccountId,
        id: &str,
    ) -> impl Future<Output = Result<(), ProfileError>> + Send;
}
