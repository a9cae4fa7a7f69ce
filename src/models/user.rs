// SPDX-License-Identifier: MIT
// Copyright 2026 Lumini contributors

//! Account and user document models.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a signed-in account (Firebase `localId`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(uid: impl Into<String>) -> Self {
        Self(uid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity handle issued by the identity service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub uid: AccountId,
    pub email: String,
}

/// Parent user document stored at `users/{uid}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Sign-in email address
    pub email: String,
    /// Optional display name given at registration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Salted digest of the parent-area password (`salt$digest`, hex)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_password_hash: Option<String>,
    /// When the account registered (RFC3339)
    pub created_at: String,
}
