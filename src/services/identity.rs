// SPDX-License-Identifier: MIT
// Copyright 2026 Lumini contributors

//! Email/password accounts via the Identity Toolkit REST API.
//!
//! Handles:
//! - Account registration (`accounts:signUp`)
//! - Password sign-in (`accounts:signInWithPassword`)
//! - The Auth emulator (`FIREBASE_AUTH_EMULATOR_HOST`)

use crate::models::{Account, AccountId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const IDENTITY_TOOLKIT_URL: &str = "https://identitytoolkit.googleapis.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MIN_PASSWORD_CHARS: usize = 6;

/// Identity service errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("An account with this email already exists")]
    EmailExists,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Password is too weak: {0}")]
    WeakPassword(String),

    #[error("Identity service unavailable: {0}")]
    Unavailable(String),
}

impl IdentityError {
    /// Map an Identity Toolkit error message (e.g. `WEAK_PASSWORD : ...`).
    fn from_api_message(message: &str) -> Self {
        let code = message.split_whitespace().next().unwrap_or_default();
        match code {
            "EMAIL_EXISTS" => IdentityError::EmailExists,
            "EMAIL_NOT_FOUND" | "INVALID_PASSWORD" | "INVALID_LOGIN_CREDENTIALS"
            | "INVALID_EMAIL" | "USER_DISABLED" => IdentityError::InvalidCredentials,
            "WEAK_PASSWORD" => IdentityError::WeakPassword(message.to_string()),
            _ => IdentityError::Unavailable(message.to_string()),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResponse {
    local_id: String,
    email: String,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

struct RestClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

struct MockAccount {
    uid: AccountId,
    password: String,
}

/// In-process account table used in memory mode and tests.
#[derive(Default)]
struct MockAccounts {
    by_email: DashMap<String, MockAccount>,
    next_uid: AtomicU64,
}

enum Provider {
    Rest(RestClient),
    Mock(MockAccounts),
}

/// Identity service client.
#[derive(Clone)]
pub struct IdentityService {
    provider: Arc<Provider>,
}

impl IdentityService {
    /// Create a client for the Identity Toolkit API.
    ///
    /// For local development with the emulator, set FIREBASE_AUTH_EMULATOR_HOST.
    pub fn new(api_key: &str) -> Result<Self, IdentityError> {
        let base_url = match std::env::var("FIREBASE_AUTH_EMULATOR_HOST") {
            Ok(host) => {
                tracing::info!(host = %host, "Using Firebase Auth emulator");
                format!("http://{}/identitytoolkit.googleapis.com/v1", host)
            }
            Err(_) => IDENTITY_TOOLKIT_URL.to_string(),
        };
        Self::with_base_url(api_key, base_url)
    }

    /// Create a client against an explicit endpoint.
    pub fn with_base_url(api_key: &str, base_url: String) -> Result<Self, IdentityError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| IdentityError::Unavailable(e.to_string()))?;
        Ok(Self {
            provider: Arc::new(Provider::Rest(RestClient {
                http,
                base_url,
                api_key: api_key.to_string(),
            })),
        })
    }

    /// Create an in-process identity service (no network).
    pub fn new_mock() -> Self {
        Self {
            provider: Arc::new(Provider::Mock(MockAccounts::default())),
        }
    }

    /// Register a new email/password account.
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<Account, IdentityError> {
        let account = match self.provider.as_ref() {
            Provider::Rest(client) => client.call("accounts:signUp", email, password).await?,
            Provider::Mock(accounts) => accounts.sign_up(email, password)?,
        };
        tracing::info!(account = %account.uid, "Account registered");
        Ok(account)
    }

    /// Verify an email/password pair.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Account, IdentityError> {
        let result = match self.provider.as_ref() {
            Provider::Rest(client) => {
                client
                    .call("accounts:signInWithPassword", email, password)
                    .await
            }
            Provider::Mock(accounts) => accounts.sign_in(email, password),
        };
        if let Err(e) = &result {
            tracing::info!(error = %e, "Sign-in rejected");
        }
        result
    }
}

impl RestClient {
    async fn call(
        &self,
        method: &str,
        email: &str,
        password: &str,
    ) -> Result<Account, IdentityError> {
        let url = format!("{}/{}", self.base_url, method);
        let response = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&PasswordRequest {
                email,
                password,
                return_secure_token: true,
            })
            .send()
            .await
            .map_err(|e| IdentityError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(match serde_json::from_str::<ApiErrorBody>(&body) {
                Ok(parsed) => IdentityError::from_api_message(&parsed.error.message),
                Err(_) => {
                    tracing::error!(status = %status, body = %body, method, "Identity Toolkit call failed");
                    IdentityError::Unavailable(format!("HTTP {}", status))
                }
            });
        }

        let parsed: AccountResponse = response
            .json()
            .await
            .map_err(|e| IdentityError::Unavailable(format!("JSON parse error: {}", e)))?;

        Ok(Account {
            uid: AccountId::new(parsed.local_id),
            email: parsed.email,
        })
    }
}

impl MockAccounts {
    fn sign_up(&self, email: &str, password: &str) -> Result<Account, IdentityError> {
        if password.chars().count() < MIN_PASSWORD_CHARS {
            return Err(IdentityError::WeakPassword(format!(
                "Password should be at least {} characters",
                MIN_PASSWORD_CHARS
            )));
        }
        let key = email.trim().to_lowercase();
        match self.by_email.entry(key.clone()) {
            Entry::Occupied(_) => Err(IdentityError::EmailExists),
            Entry::Vacant(slot) => {
                let n = self.next_uid.fetch_add(1, Ordering::Relaxed) + 1;
                let uid = AccountId::new(format!("mock-uid-{}", n));
                slot.insert(MockAccount {
                    uid: uid.clone(),
                    password: password.to_string(),
                });
                Ok(Account { uid, email: key })
            }
        }
    }

    fn sign_in(&self, email: &str, password: &str) -> Result<Account, IdentityError> {
        let key = email.trim().to_lowercase();
        let entry = self
            .by_email
            .get(&key)
            .ok_or(IdentityError::InvalidCredentials)?;
        if entry.password != password {
            return Err(IdentityError::InvalidCredentials);
        }
        Ok(Account {
            uid: entry.uid.clone(),
            email: key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_messages_map_to_errors() {
        assert_eq!(
            IdentityError::from_api_message("EMAIL_EXISTS"),
            IdentityError::EmailExists
        );
        assert_eq!(
            IdentityError::from_api_message("INVALID_LOGIN_CREDENTIALS"),
            IdentityError::InvalidCredentials
        );
        assert!(matches!(
            IdentityError::from_api_message(
                "WEAK_PASSWORD : Password should be at least 6 characters"
            ),
            IdentityError::WeakPassword(_)
        ));
        assert!(matches!(
            IdentityError::from_api_message("TOO_MANY_ATTEMPTS_TRY_LATER"),
            IdentityError::Unavailable(_)
        ));
    }

    #[tokio::test]
    async fn test_mock_sign_up_and_sign_in() {
        let identity = IdentityService::new_mock();

        let account = identity.sign_up("Parent@Example.com", "secret1").await.unwrap();
        assert_eq!(account.email, "parent@example.com");

        assert_eq!(
            identity.sign_up("parent@example.com", "another1").await,
            Err(IdentityError::EmailExists)
        );

        let signed_in = identity.sign_in("parent@example.com", "secret1").await.unwrap();
        assert_eq!(signed_in.uid, account.uid);

        assert_eq!(
            identity.sign_in("parent@example.com", "wrong").await,
            Err(IdentityError::InvalidCredentials)
        );
        assert_eq!(
            identity.sign_in("nobody@example.com", "secret1").await,
            Err(IdentityError::InvalidCredentials)
        );
    }

    #[tokio::test]
    async fn test_mock_rejects_weak_password() {
        let identity = IdentityService::new_mock();
        assert!(matches!(
            identity.sign_up("a@example.com", "123").await,
            Err(IdentityError::WeakPassword(_))
        ));
    }
}
