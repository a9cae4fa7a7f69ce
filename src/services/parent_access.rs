// SPDX-License-Identifier: MIT
// Copyright 2026 Lumini contributors

//! Parent-area password and unlock state.
//!
//! The password is stored on the user document as `salt_hex$digest_hex`, where
//! the digest is HMAC-SHA256 keyed with the server's parent-password key over
//! `salt || password`. An unlock lasts until the account signs out.

use crate::models::AccountId;
use dashmap::DashSet;
use hmac::{Hmac, Mac};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const SALT_LEN: usize = 16;

/// Shortest accepted parent password.
pub const MIN_PARENT_PASSWORD_CHARS: u64 = 6;

/// Parent password hashing errors.
#[derive(Debug, thiserror::Error)]
pub enum ParentAccessError {
    #[error("Password must be at least {} characters", MIN_PARENT_PASSWORD_CHARS)]
    TooShort,

    #[error("Random source failure")]
    Rng,

    #[error("Invalid HMAC key")]
    Key,
}

/// Parent-area gatekeeper.
pub struct ParentAccess {
    key: Vec<u8>,
    rng: SystemRandom,
    unlocked: DashSet<AccountId>,
}

impl ParentAccess {
    pub fn new(key: Vec<u8>) -> Self {
        Self {
            key,
            rng: SystemRandom::new(),
            unlocked: DashSet::new(),
        }
    }

    fn digest(&self, salt: &[u8], password: &str) -> Result<Vec<u8>, ParentAccessError> {
        let mut mac = HmacSha256::new_from_slice(&self.key).map_err(|_| ParentAccessError::Key)?;
        mac.update(salt);
        mac.update(password.as_bytes());
        Ok(mac.finalize().into_bytes().to_vec())
    }

    /// Hash a new parent password with a fresh random salt.
    pub fn hash_password(&self, password: &str) -> Result<String, ParentAccessError> {
        if (password.chars().count() as u64) < MIN_PARENT_PASSWORD_CHARS {
            return Err(ParentAccessError::TooShort);
        }
        let mut salt = [0u8; SALT_LEN];
        self.rng
            .fill(&mut salt)
            .map_err(|_| ParentAccessError::Rng)?;
        let digest = self.digest(&salt, password)?;
        Ok(format!("{}${}", hex::encode(salt), hex::encode(digest)))
    }

    /// Check a password against a stored `salt$digest` value.
    ///
    /// Malformed stored values never verify.
    pub fn verify_password(&self, password: &str, stored: &str) -> bool {
        let Some((salt_hex, digest_hex)) = stored.split_once('$') else {
            tracing::warn!("Stored parent password hash is malformed");
            return false;
        };
        let (Ok(salt), Ok(expected)) = (hex::decode(salt_hex), hex::decode(digest_hex)) else {
            tracing::warn!("Stored parent password hash is not hex");
            return false;
        };
        match self.digest(&salt, password) {
            Ok(actual) => actual.ct_eq(&expected).unwrap_u8() == 1,
            Err(e) => {
                tracing::error!(error = %e, "Parent password digest failed");
                false
            }
        }
    }

    pub fn unlock(&self, account: &AccountId) {
        tracing::info!(account = %account, "Parent area unlocked");
        self.unlocked.insert(account.clone());
    }

    pub fn is_unlocked(&self, account: &AccountId) -> bool {
        self.unlocked.contains(account)
    }

    /// Revoke the unlock (on sign-out).
    pub fn lock(&self, account: &AccountId) {
        if self.unlocked.remove(account).is_some() {
            tracing::info!(account = %account, "Parent area locked");
        }
    }
}
