// SPDX-License-Identifier: MIT
// Copyright 2026 Lumini contributors

//! Signed-in account state, pushed to subscribers.

use crate::models::{Account, AccountId};
use crate::profile::cache::{LocalCache, SESSION_KEY};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One emission of the session source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub account: Option<AccountId>,
    pub loading: bool,
}

impl SessionState {
    /// Initial state before the identity service has reported anything.
    pub fn initial() -> Self {
        Self {
            account: None,
            loading: true,
        }
    }

    pub fn signed_in(account: AccountId) -> Self {
        Self {
            account: Some(account),
            loading: false,
        }
    }

    pub fn signed_out() -> Self {
        Self {
            account: None,
            loading: false,
        }
    }
}

/// Callback invoked with every session emission.
pub type SessionCallback = Arc<dyn Fn(&SessionState) + Send + Sync>;

/// Push-style source of session state.
pub trait SessionSource {
    /// Register a callback. It is invoked immediately with the current state,
    /// then on every change until the returned subscription is dropped.
    fn subscribe(&self, callback: SessionCallback) -> Subscription;
}

/// Handle returned by [`SessionSource::subscribe`]; delivery stops when it is
/// dropped or [`Subscription::unsubscribe`] is called.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    callbacks: Vec<(u64, SessionCallback)>,
}

struct Inner {
    state: SessionState,
    account: Option<Account>,
    subscribers: Subscribers,
}

/// Session source fed by the auth routes.
///
/// Emissions with the same state as the previous one are suppressed. A
/// persistent manager mirrors the signed-in account into the local cache so
/// a restarted process can resume it.
///
/// Transitions are serialized on `delivery`, held from the state change
/// until every subscriber has seen it, so subscribers observe emissions in
/// the order the state took them. Callbacks must not emit.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Mutex<Inner>>,
    delivery: Arc<Mutex<()>>,
    persist: Option<Arc<dyn LocalCache>>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: SessionState::initial(),
                account: None,
                subscribers: Subscribers::default(),
            })),
            delivery: Arc::new(Mutex::new(())),
            persist: None,
        }
    }

    /// Session manager that survives restarts through `cache`.
    pub fn persistent(cache: Arc<dyn LocalCache>) -> Self {
        Self {
            persist: Some(cache),
            ..Self::new()
        }
    }

    /// Resolve the initial loading state from the persisted account.
    pub fn restore(&self) {
        let saved = self
            .persist
            .as_ref()
            .and_then(|cache| cache.get(SESSION_KEY))
            .and_then(|raw| match serde_json::from_str::<Account>(&raw) {
                Ok(account) => Some(account),
                Err(e) => {
                    tracing::warn!(error = %e, "Persisted session is unreadable");
                    None
                }
            });
        match saved {
            Some(account) => {
                tracing::info!(account = %account.uid, "Resuming persisted session");
                self.sign_in(account);
            }
            None => self.sign_out(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver_lock(&self) -> MutexGuard<'_, ()> {
        self.delivery.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current emission.
    pub fn state(&self) -> SessionState {
        self.lock().state.clone()
    }

    /// Currently signed-in account, if any.
    pub fn account(&self) -> Option<Account> {
        self.lock().account.clone()
    }

    /// Whether `uid` is the signed-in account.
    pub fn is_current(&self, uid: &AccountId) -> bool {
        self.lock().state.account.as_ref() == Some(uid)
    }

    /// A sign-in or sign-out is in progress.
    pub fn begin_loading(&self) {
        let _delivery = self.deliver_lock();
        let account = self.lock().state.account.clone();
        self.emit(SessionState {
            account,
            loading: true,
        });
    }

    /// Report a completed sign-in.
    pub fn sign_in(&self, account: Account) {
        let _delivery = self.deliver_lock();
        let uid = account.uid.clone();
        if let Some(cache) = &self.persist {
            match serde_json::to_string(&account) {
                Ok(json) => cache.set(SESSION_KEY, &json),
                Err(e) => tracing::error!(error = %e, "Failed to persist session"),
            }
        }
        self.lock().account = Some(account);
        tracing::info!(account = %uid, "Session signed in");
        self.emit(SessionState::signed_in(uid));
    }

    /// Report a sign-out (or a failed sign-in).
    pub fn sign_out(&self) {
        let _delivery = self.deliver_lock();
        if let Some(cache) = &self.persist {
            cache.remove(SESSION_KEY);
        }
        self.lock().account = None;
        tracing::info!("Session signed out");
        self.emit(SessionState::signed_out());
    }

    // Caller holds the delivery guard.
    fn emit(&self, next: SessionState) {
        let callbacks: Vec<SessionCallback> = {
            let mut inner = self.lock();
            if inner.state == next {
                return;
            }
            inner.state = next.clone();
            inner
                .subscribers
                .callbacks
                .iter()
                .map(|(_, cb)| cb.clone())
                .collect()
        };

        tracing::debug!(
            account = ?next.account,
            loading = next.loading,
            subscribers = callbacks.len(),
            "Session state changed"
        );

        // Callbacks run outside the state lock so they may read the session.
        for callback in callbacks {
            callback(&next);
        }
    }
}

impl SessionSource for SessionManager {
    fn subscribe(&self, callback: SessionCallback) -> Subscription {
        let _delivery = self.deliver_lock();
        let (id, current) = {
            let mut inner = self.lock();
            let id = inner.subscribers.next_id;
            inner.subscribers.next_id += 1;
            inner.subscribers.callbacks.push((id, callback.clone()));
            (id, inner.state.clone())
        };

        callback(&current);

        let inner = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
                inner.subscribers.callbacks.retain(|(sid, _)| *sid != id);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (SessionCallback, Arc<Mutex<Vec<SessionState>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: SessionCallback = Arc::new(move |s: &SessionState| {
            sink.lock().unwrap().push(s.clone());
        });
        (callback, seen)
    }

    fn account(uid: &str) -> Account {
        Account {
            uid: AccountId::new(uid),
            email: format!("{}@example.com", uid),
        }
    }

    #[test]
    fn test_subscribe_delivers_current_state() {
        let session = SessionManager::new();
        let (callback, seen) = recorder();
        let _sub = session.subscribe(callback);

        assert_eq!(*seen.lock().unwrap(), vec![SessionState::initial()]);
    }

    #[test]
    fn test_duplicate_emissions_suppressed() {
        let session = SessionManager::new();
        let (callback, seen) = recorder();
        let _sub = session.subscribe(callback);

        session.sign_out();
        session.sign_out();
        session.sign_in(account("a"));
        session.sign_in(account("a"));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[1], SessionState::signed_out());
        assert_eq!(seen[2], SessionState::signed_in(AccountId::new("a")));
    }

    #[test]
    fn test_dropped_subscription_stops_delivery() {
        let session = SessionManager::new();
        let (callback, seen) = recorder();
        let sub = session.subscribe(callback);
        sub.unsubscribe();

        session.sign_in(account("a"));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_persistent_session_restores_account() {
        use crate::profile::cache::MemoryCache;

        let cache: Arc<dyn LocalCache> = Arc::new(MemoryCache::new());
        let first = SessionManager::persistent(cache.clone());
        first.sign_in(account("a"));

        let restarted = SessionManager::persistent(cache.clone());
        assert!(restarted.state().loading);
        restarted.restore();
        assert_eq!(restarted.state(), SessionState::signed_in(AccountId::new("a")));
        assert_eq!(restarted.account(), Some(account("a")));

        restarted.sign_out();
        let again = SessionManager::persistent(cache);
        again.restore();
        assert_eq!(again.state(), SessionState::signed_out());
    }

    #[test]
    fn test_concurrent_sign_ins_reach_subscribers_in_state_order() {
        use std::thread;
        use std::time::Duration;

        let session = SessionManager::new();
        // Slow only for "a", so an unserialized "b" emission would overtake it.
        let slow: SessionCallback = Arc::new(|s: &SessionState| {
            if s.account == Some(AccountId::new("a")) {
                thread::sleep(Duration::from_millis(100));
            }
        });
        let _slow = session.subscribe(slow);
        let last_seen = Arc::new(Mutex::new(None));
        let sink = last_seen.clone();
        let _last = session.subscribe(Arc::new(move |s: &SessionState| {
            *sink.lock().unwrap() = s.account.clone();
        }));

        let first = {
            let session = session.clone();
            thread::spawn(move || session.sign_in(account("a")))
        };
        thread::sleep(Duration::from_millis(20));
        let second = {
            let session = session.clone();
            thread::spawn(move || session.sign_in(account("b")))
        };
        first.join().unwrap();
        second.join().unwrap();

        assert_eq!(*last_seen.lock().unwrap(), session.state().account);
    }

    #[test]
    fn test_begin_loading_keeps_account() {
        let session = SessionManager::new();
        session.sign_in(account("a"));
        session.begin_loading();

        let state = session.state();
        assert!(state.loading);
        assert_eq!(state.account, Some(AccountId::new("a")));
        assert!(session.is_current(&AccountId::new("a")));
    }
}
