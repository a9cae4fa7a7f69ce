// SPDX-License-Identifier: MIT
// Copyright 2026 Lumini contributors

//! Active child profile controller.
//!
//! Single source of truth for "which child profile is active right now".
//! It reconciles three inputs:
//! - the session source (which account is signed in),
//! - the profile store (which profiles that account owns),
//! - the local cache (which profile was active last time).
//!
//! Every profile-list fetch is tagged with the account it was issued for and
//! a generation number. A result arriving after the account changed (or
//! after a newer fetch was issued) is dropped. Mutations from views are
//! serialized through one async mutex so an update never merges into a slot
//! that a concurrent selection has replaced.

use crate::avatars;
use crate::models::child::MAX_CHILD_PROFILES;
use crate::models::{AccountId, ChildProfile, NewChildProfile, ProfilePatch};
use crate::profile::cache::{LocalCache, ACTIVE_PROFILE_KEY};
use crate::profile::gate::ViewGate;
use crate::profile::store::{ProfileError, ProfileStore};
use crate::services::session::{SessionCallback, SessionSource, SessionState, Subscription};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Point-in-time view of the controller, published to consuming views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileSnapshot {
    pub account: Option<AccountId>,
    pub loading: bool,
    pub fetching: bool,
    pub active: Option<ChildProfile>,
}

struct SlotState {
    /// Last account seen in a non-loading emission. `None` until the first one.
    observed: Option<Option<AccountId>>,
    account: Option<AccountId>,
    loading: bool,
    generation: u64,
    fetching: bool,
    profiles: Vec<ChildProfile>,
    active: Option<ChildProfile>,
}

impl SlotState {
    fn snapshot(&self) -> ProfileSnapshot {
        ProfileSnapshot {
            account: self.account.clone(),
            loading: self.loading,
            fetching: self.fetching,
            active: self.active.clone(),
        }
    }

    fn active_id(&self) -> Option<&str> {
        self.active.as_ref().and_then(|p| p.id.as_deref())
    }

    /// Invalidate any in-flight fetch after a local roster change.
    ///
    /// A fetch that read the roster before the change would overwrite it, so
    /// it is superseded; returns the tag of the fetch to issue in its place.
    fn supersede_fetch(&mut self) -> Option<(AccountId, u64)> {
        self.generation += 1;
        if !self.fetching {
            return None;
        }
        Some((self.account.clone()?, self.generation))
    }
}

/// Pick the active profile from a freshly fetched list.
///
/// 1. empty list: none
/// 2. cached profile still present: the fetched copy of it
/// 3. otherwise: the first profile
pub fn reconcile_slot(
    fetched: &[ChildProfile],
    cached: Option<&ChildProfile>,
) -> Option<ChildProfile> {
    let first = fetched.first()?;
    let cached_id = cached.and_then(|c| c.id.as_deref());
    let chosen = cached_id
        .and_then(|id| fetched.iter().find(|p| p.has_id(id)))
        .unwrap_or(first);
    Some(chosen.clone())
}

/// Owner of the active profile slot.
pub struct ActiveProfileController<S> {
    store: S,
    cache: Arc<dyn LocalCache>,
    state: Mutex<SlotState>,
    mutation: tokio::sync::Mutex<()>,
    snapshots: watch::Sender<ProfileSnapshot>,
}

impl<S: ProfileStore> ActiveProfileController<S> {
    pub fn new(store: S, cache: Arc<dyn LocalCache>) -> Arc<Self> {
        let state = SlotState {
            observed: None,
            account: None,
            loading: true,
            generation: 0,
            fetching: false,
            profiles: Vec::new(),
            active: None,
        };
        let (snapshots, _) = watch::channel(state.snapshot());
        Arc::new(Self {
            store,
            cache,
            state: Mutex::new(state),
            mutation: tokio::sync::Mutex::new(()),
            snapshots,
        })
    }

    /// Subscribe this controller to a session source.
    ///
    /// Must be called from within a Tokio runtime: fetches are spawned.
    pub fn attach(self: &Arc<Self>, source: &impl SessionSource) -> Subscription {
        let weak = Arc::downgrade(self);
        let callback: SessionCallback = Arc::new(move |session: &SessionState| {
            if let Some(controller) = weak.upgrade() {
                controller.observe(session);
            }
        });
        source.subscribe(callback)
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &SlotState) {
        self.snapshots.send_replace(state.snapshot());
    }

    // ─── Reads ───────────────────────────────────────────────────

    /// Currently active profile.
    pub fn get_active(&self) -> Option<ChildProfile> {
        self.lock().active.clone()
    }

    /// Most recently fetched profile list for the signed-in account.
    pub fn profiles(&self) -> Vec<ChildProfile> {
        self.lock().profiles.clone()
    }

    pub fn snapshot(&self) -> ProfileSnapshot {
        self.lock().snapshot()
    }

    /// Watch snapshots as they change.
    pub fn subscribe(&self) -> watch::Receiver<ProfileSnapshot> {
        self.snapshots.subscribe()
    }

    /// Wait until the session has resolved and no fetch is in flight.
    pub async fn settled(&self) -> ProfileSnapshot {
        let mut rx = self.snapshots.subscribe();
        let settled = match rx.wait_for(|s| !s.loading && !s.fetching).await {
            Ok(snapshot) => (*snapshot).clone(),
            Err(_) => self.snapshot(),
        };
        settled
    }

    /// Gate outcome for a view that needs an active profile.
    pub fn gate(&self) -> ViewGate {
        ViewGate::evaluate(&self.snapshot())
    }

    // ─── Session handling ────────────────────────────────────────

    /// Apply one session emission.
    ///
    /// Returns the spawned reconciliation when an account was signed in.
    pub fn observe(self: &Arc<Self>, session: &SessionState) -> Option<JoinHandle<()>> {
        let mut state = self.lock();
        state.loading = session.loading;

        if session.loading || state.observed.as_ref() == Some(&session.account) {
            self.publish(&state);
            return None;
        }

        state.observed = Some(session.account.clone());
        state.account = session.account.clone();
        state.generation += 1;
        state.profiles.clear();

        match session.account.clone() {
            None => {
                tracing::info!("Signed out, clearing active profile");
                state.fetching = false;
                self.write_slot(&mut state, None);
                None
            }
            Some(account) => {
                // Discard the previous account's slot without touching the
                // cache: reconciliation reads it.
                state.active = None;
                state.fetching = true;
                let generation = state.generation;
                self.publish(&state);
                drop(state);
                tracing::info!(account = %account, generation, "Account changed, fetching profiles");
                Some(self.spawn_reconcile(account, generation))
            }
        }
    }

    /// Re-run reconciliation for the current account.
    pub fn refresh(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut state = self.lock();
        let account = state.account.clone()?;
        if state.loading {
            return None;
        }
        state.generation += 1;
        state.fetching = true;
        let generation = state.generation;
        self.publish(&state);
        drop(state);
        tracing::debug!(account = %account, generation, "Refreshing profiles");
        Some(self.spawn_reconcile(account, generation))
    }

    fn reissue(self: &Arc<Self>, superseded: Option<(AccountId, u64)>) {
        if let Some((account, generation)) = superseded {
            tracing::debug!(account = %account, generation, "Re-issuing fetch superseded by a local change");
            self.spawn_reconcile(account, generation);
        }
    }

    fn spawn_reconcile(self: &Arc<Self>, account: AccountId, generation: u64) -> JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            let fetched = match controller.store.list(&account).await {
                Ok(profiles) => profiles,
                Err(e) => {
                    tracing::warn!(account = %account, error = %e, "Profile fetch failed, treating as empty");
                    Vec::new()
                }
            };
            controller.apply_fetch(&account, generation, fetched);
        })
    }

    fn apply_fetch(&self, account: &AccountId, generation: u64, fetched: Vec<ChildProfile>) {
        let mut state = self.lock();
        if state.generation != generation || state.account.as_ref() != Some(account) {
            tracing::debug!(
                account = %account,
                generation,
                current_generation = state.generation,
                "Discarding stale profile fetch"
            );
            return;
        }

        let cached = if fetched.is_empty() {
            None
        } else {
            self.read_cached()
        };
        let chosen = reconcile_slot(&fetched, cached.as_ref());

        tracing::info!(
            account = %account,
            count = fetched.len(),
            active = ?chosen.as_ref().and_then(|p| p.id.as_deref()),
            restored = cached.is_some() && chosen.as_ref().map(|c| c.id.clone()) == cached.as_ref().map(|c| c.id.clone()),
            "Profiles reconciled"
        );

        state.profiles = fetched;
        state.fetching = false;
        self.write_slot(&mut state, chosen);
    }

    // ─── Local cache ─────────────────────────────────────────────

    fn read_cached(&self) -> Option<ChildProfile> {
        let raw = self.cache.get(ACTIVE_PROFILE_KEY)?;
        match serde_json::from_str(&raw) {
            Ok(profile) => Some(profile),
            Err(e) => {
                tracing::warn!(error = %e, "Cached active profile is unreadable, removing");
                self.cache.remove(ACTIVE_PROFILE_KEY);
                None
            }
        }
    }

    /// Replace the slot and mirror it into the cache.
    fn write_slot(&self, state: &mut SlotState, profile: Option<ChildProfile>) {
        match &profile {
            Some(p) => match serde_json::to_string(p) {
                Ok(json) => self.cache.set(ACTIVE_PROFILE_KEY, &json),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize active profile");
                    self.cache.remove(ACTIVE_PROFILE_KEY);
                }
            },
            None => self.cache.remove(ACTIVE_PROFILE_KEY),
        }
        state.active = profile;
        self.publish(state);
    }

    fn current_account(&self) -> Result<AccountId, ProfileError> {
        let state = self.lock();
        if state.loading {
            return Err(ProfileError::NotSignedIn);
        }
        state.account.clone().ok_or(ProfileError::NotSignedIn)
    }

    // ─── Mutations ───────────────────────────────────────────────

    /// Override the slot (explicit selection, or `None` to clear it).
    pub async fn set_active(&self, profile: Option<ChildProfile>) {
        let _guard = self.mutation.lock().await;
        let mut state = self.lock();
        tracing::info!(
            profile = ?profile.as_ref().and_then(|p| p.id.as_deref()),
            "Active profile set"
        );
        self.write_slot(&mut state, profile);
    }

    /// Make the profile with `id` from the fetched list active.
    pub async fn select_profile(&self, id: &str) -> Result<ChildProfile, ProfileError> {
        let _guard = self.mutation.lock().await;
        let mut state = self.lock();
        if state.account.is_none() {
            return Err(ProfileError::NotSignedIn);
        }
        let profile = state
            .profiles
            .iter()
            .find(|p| p.has_id(id))
            .cloned()
            .ok_or_else(|| ProfileError::NotFound(id.to_string()))?;
        tracing::info!(profile = id, "Active profile selected");
        self.write_slot(&mut state, Some(profile.clone()));
        Ok(profile)
    }

    /// Persist a partial update of the active profile, then apply it.
    ///
    /// The slot and cache change only after the store accepted the write.
    pub async fn update_active(
        self: &Arc<Self>,
        patch: ProfilePatch,
    ) -> Result<ChildProfile, ProfileError> {
        let patch = validate_patch(patch)?;
        let _guard = self.mutation.lock().await;
        let (account, id) = {
            let state = self.lock();
            let account = state.account.clone().ok_or(ProfileError::NoActiveProfile)?;
            let id = state.active_id().ok_or(ProfileError::NoActiveProfile)?;
            (account, id.to_string())
        };
        self.persist_update(account, &id, &patch).await
    }

    /// Persist a partial update of any profile of the signed-in account.
    pub async fn update_profile(
        self: &Arc<Self>,
        id: &str,
        patch: ProfilePatch,
    ) -> Result<ChildProfile, ProfileError> {
        let patch = validate_patch(patch)?;
        let _guard = self.mutation.lock().await;
        let account = self.current_account()?;
        self.persist_update(account, id, &patch).await
    }

    // Caller holds the mutation guard.
    async fn persist_update(
        self: &Arc<Self>,
        account: AccountId,
        id: &str,
        patch: &ProfilePatch,
    ) -> Result<ChildProfile, ProfileError> {
        let base = {
            let state = self.lock();
            state
                .active
                .iter()
                .chain(state.profiles.iter())
                .find(|p| p.has_id(id))
                .cloned()
        };
        let Some(base) = base else {
            self.refresh();
            return Err(ProfileError::NotFound(id.to_string()));
        };

        if let Err(e) = self.store.update(&account, id, patch).await {
            tracing::warn!(account = %account, profile = id, error = %e, "Profile update failed");
            if matches!(e, ProfileError::NotFound(_)) {
                self.refresh();
            }
            return Err(e);
        }

        let mut state = self.lock();
        if state.account.as_ref() != Some(&account) {
            tracing::debug!(profile = id, "Account changed during update, not applying locally");
            return Ok(patch.apply_to(&base));
        }
        let superseded = state.supersede_fetch();

        // Merge into the latest local copy, which a refresh may have replaced.
        let latest = state
            .profiles
            .iter()
            .find(|p| p.has_id(id))
            .cloned()
            .unwrap_or(base);
        let merged = patch.apply_to(&latest);
        if let Some(slot) = state.profiles.iter_mut().find(|p| p.has_id(id)) {
            *slot = merged.clone();
        }

        let is_active = state.active_id() == Some(id);
        if is_active {
            let current = state.active.clone().unwrap_or(latest);
            self.write_slot(&mut state, Some(patch.apply_to(&current)));
        } else {
            self.publish(&state);
        }

        drop(state);
        self.reissue(superseded);

        tracing::info!(account = %account, profile = id, active = is_active, "Profile updated");
        Ok(merged)
    }

    /// Create a child profile for the signed-in account.
    ///
    /// The profile becomes active when no profile is active yet.
    pub async fn create_profile(
        self: &Arc<Self>,
        data: NewChildProfile,
    ) -> Result<ChildProfile, ProfileError> {
        let data = data.normalized().map_err(ProfileError::Invalid)?;
        if let Some(avatar_id) = data.avatar_id {
            check_avatar(avatar_id)?;
        }

        let _guard = self.mutation.lock().await;
        let account = self.current_account()?;

        let existing = self.store.list(&account).await?;
        if existing.len() >= MAX_CHILD_PROFILES {
            tracing::info!(account = %account, count = existing.len(), "Profile limit reached");
            return Err(ProfileError::LimitExceeded {
                limit: MAX_CHILD_PROFILES,
            });
        }

        let created = self.store.create(&account, data).await?;
        tracing::info!(account = %account, profile = ?created.id, "Profile created");

        let mut state = self.lock();
        if state.account.as_ref() == Some(&account) {
            let superseded = state.supersede_fetch();
            let mut profiles = existing;
            profiles.push(created.clone());
            state.profiles = profiles;
            if state.active.is_none() {
                self.write_slot(&mut state, Some(created.clone()));
            } else {
                self.publish(&state);
            }
            drop(state);
            self.reissue(superseded);
        }
        Ok(created)
    }

    /// Delete a child profile; clears the slot if it was the active one.
    pub async fn delete_profile(self: &Arc<Self>, id: &str) -> Result<(), ProfileError> {
        let _guard = self.mutation.lock().await;
        let account = self.current_account()?;

        if let Err(e) = self.store.delete(&account, id).await {
            tracing::warn!(account = %account, profile = id, error = %e, "Profile delete failed");
            if matches!(e, ProfileError::NotFound(_)) {
                self.refresh();
            }
            return Err(e);
        }

        let mut state = self.lock();
        if state.account.as_ref() == Some(&account) {
            let superseded = state.supersede_fetch();
            state.profiles.retain(|p| !p.has_id(id));
            if state.active_id() == Some(id) {
                tracing::info!(profile = id, "Deleted the active profile, clearing slot");
                self.write_slot(&mut state, None);
            } else {
                self.publish(&state);
            }
            drop(state);
            self.reissue(superseded);
        }
        tracing::info!(account = %account, profile = id, "Profile deleted");
        Ok(())
    }
}

fn check_avatar(avatar_id: u32) -> Result<(), ProfileError> {
    if avatars::is_known(avatar_id) {
        Ok(())
    } else {
        Err(ProfileError::Invalid(format!("Unknown avatar {}", avatar_id)))
    }
}

fn validate_patch(patch: ProfilePatch) -> Result<ProfilePatch, ProfileError> {
    let patch = patch.normalized().map_err(ProfileError::Invalid)?;
    if let Some(avatar_id) = patch.avatar_id {
        check_avatar(avatar_id)?;
    }
    Ok(patch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryDb;
    use crate::models::{LimitationType, Sex};
    use crate::profile::cache::MemoryCache;
    use dashmap::DashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;

    /// Memory store with injectable failures and held fetches.
    ///
    /// A held `list` reads the roster first and returns it once released.
    #[derive(Clone, Default)]
    struct ScriptedStore {
        db: MemoryDb,
        fail: Arc<AtomicBool>,
        held_lists: Arc<DashMap<AccountId, watch::Sender<bool>>>,
        held_updates: Arc<std::sync::Mutex<Option<Arc<Notify>>>>,
    }

    impl ScriptedStore {
        fn hold_list(&self, account: &AccountId) {
            self.held_lists
                .insert(account.clone(), watch::channel(false).0);
        }

        fn release_list(&self, account: &AccountId) {
            if let Some((_, gate)) = self.held_lists.remove(account) {
                gate.send_replace(true);
            }
        }

        fn hold_updates(&self) -> Arc<Notify> {
            let gate = Arc::new(Notify::new());
            *self.held_updates.lock().unwrap() = Some(gate.clone());
            gate
        }

        fn check(&self) -> Result<(), ProfileError> {
            if self.fail.load(Ordering::SeqCst) {
                Err(ProfileError::BackendUnavailable("injected".to_string()))
            } else {
                Ok(())
            }
        }
    }

    impl ProfileStore for ScriptedStore {
        async fn list(&self, account: &AccountId) -> Result<Vec<ChildProfile>, ProfileError> {
            let gate = self.held_lists.get(account).map(|g| g.subscribe());
            let result = match self.check() {
                Ok(()) => self.db.list(account).await,
                Err(e) => Err(e),
            };
            if let Some(mut gate) = gate {
                let _ = gate.wait_for(|open| *open).await;
            }
            result
        }

        async fn create(
            &self,
            account: &AccountId,
            data: NewChildProfile,
        ) -> Result<ChildProfile, ProfileError> {
            self.check()?;
            self.db.create(account, data).await
        }

        async fn update(
            &self,
            account: &AccountId,
            id: &str,
            patch: &ProfilePatch,
        ) -> Result<(), ProfileError> {
            let gate = self.held_updates.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            self.check()?;
            self.db.update(account, id, patch).await
        }

        async fn delete(&self, account: &AccountId, id: &str) -> Result<(), ProfileError> {
            self.check()?;
            self.db.delete(account, id).await
        }
    }

    fn new_child(name: &str) -> NewChildProfile {
        NewChildProfile {
            name: name.to_string(),
            sex: Sex::Unspecified,
            limitation_type: LimitationType::Adhd,
            avatar_id: None,
        }
    }

    async fn seed(store: &ScriptedStore, account: &AccountId, names: &[&str]) -> Vec<ChildProfile> {
        let mut out = Vec::new();
        for name in names {
            out.push(store.db.create(account, new_child(name)).await.unwrap());
        }
        out
    }

    fn setup() -> (
        ScriptedStore,
        Arc<MemoryCache>,
        Arc<ActiveProfileController<ScriptedStore>>,
    ) {
        let store = ScriptedStore::default();
        let cache = Arc::new(MemoryCache::new());
        let controller = ActiveProfileController::new(store.clone(), cache.clone());
        (store, cache, controller)
    }

    fn cached(cache: &MemoryCache) -> Option<ChildProfile> {
        cache
            .get(ACTIVE_PROFILE_KEY)
            .map(|raw| serde_json::from_str(&raw).unwrap())
    }

    async fn sign_in(
        controller: &Arc<ActiveProfileController<ScriptedStore>>,
        account: &AccountId,
    ) {
        controller
            .observe(&SessionState::signed_in(account.clone()))
            .expect("sign-in spawns a fetch")
            .await
            .unwrap();
    }

    #[test]
    fn test_reconcile_slot_rules() {
        let a = ChildProfile {
            id: Some("a".into()),
            name: "A".into(),
            sex: Sex::Male,
            limitation_type: LimitationType::Adhd,
            avatar_id: None,
        };
        let b = ChildProfile {
            id: Some("b".into()),
            name: "B".into(),
            ..a.clone()
        };
        let stale_b = ChildProfile {
            name: "Old B".into(),
            ..b.clone()
        };
        let gone = ChildProfile {
            id: Some("zzz".into()),
            ..a.clone()
        };
        let list = vec![a.clone(), b.clone()];

        assert_eq!(reconcile_slot(&[], Some(&a)), None);
        assert_eq!(reconcile_slot(&list, Some(&stale_b)), Some(b));
        assert_eq!(reconcile_slot(&list, Some(&gone)), Some(a.clone()));
        assert_eq!(reconcile_slot(&list, None), Some(a));
    }

    #[tokio::test]
    async fn test_cached_profile_is_restored_from_fresh_copy() {
        let (store, cache, controller) = setup();
        let acc = AccountId::new("acc1");
        let profiles = seed(&store, &acc, &["A", "B", "C"]).await;

        let stale = ChildProfile {
            name: "stale name".to_string(),
            ..profiles[1].clone()
        };
        cache.set(ACTIVE_PROFILE_KEY, &serde_json::to_string(&stale).unwrap());

        sign_in(&controller, &acc).await;

        assert_eq!(controller.get_active(), Some(profiles[1].clone()));
        assert_eq!(cached(&cache), Some(profiles[1].clone()));
        assert_eq!(controller.profiles().len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_cached_id_defaults_to_first() {
        let (store, cache, controller) = setup();
        let acc = AccountId::new("acc1");
        let profiles = seed(&store, &acc, &["A", "B", "C"]).await;
        let foreign = ChildProfile {
            id: Some("not-here".to_string()),
            ..profiles[2].clone()
        };
        cache.set(ACTIVE_PROFILE_KEY, &serde_json::to_string(&foreign).unwrap());

        sign_in(&controller, &acc).await;

        assert_eq!(controller.get_active(), Some(profiles[0].clone()));
        assert_eq!(cached(&cache), Some(profiles[0].clone()));
    }

    #[tokio::test]
    async fn test_empty_list_clears_slot_and_cache() {
        let (_store, cache, controller) = setup();
        cache.set(ACTIVE_PROFILE_KEY, r#"{"id":"x","name":"X","sex":"male"}"#);

        sign_in(&controller, &AccountId::new("acc1")).await;

        assert_eq!(controller.get_active(), None);
        assert_eq!(cache.get(ACTIVE_PROFILE_KEY), None);
        assert_eq!(controller.gate(), ViewGate::SelectProfile);
    }

    #[tokio::test]
    async fn test_corrupt_cache_entry_is_removed() {
        let (store, cache, controller) = setup();
        let acc = AccountId::new("acc1");
        let profiles = seed(&store, &acc, &["A"]).await;
        cache.set(ACTIVE_PROFILE_KEY, "{not json");

        sign_in(&controller, &acc).await;

        assert_eq!(controller.get_active(), Some(profiles[0].clone()));
        assert_eq!(cached(&cache), Some(profiles[0].clone()));
    }

    #[tokio::test]
    async fn test_fetch_failure_degrades_to_empty() {
        let (store, cache, controller) = setup();
        let acc = AccountId::new("acc1");
        seed(&store, &acc, &["A"]).await;
        cache.set(ACTIVE_PROFILE_KEY, "{}");
        store.fail.store(true, Ordering::SeqCst);

        sign_in(&controller, &acc).await;

        assert_eq!(controller.get_active(), None);
        assert!(controller.profiles().is_empty());
        assert_eq!(cache.get(ACTIVE_PROFILE_KEY), None);
        assert!(!controller.snapshot().fetching);
    }

    #[tokio::test]
    async fn test_sign_out_clears_state() {
        let (store, cache, controller) = setup();
        let acc = AccountId::new("acc1");
        seed(&store, &acc, &["A", "B"]).await;
        sign_in(&controller, &acc).await;
        assert!(controller.get_active().is_some());

        assert!(controller.observe(&SessionState::signed_out()).is_none());

        assert_eq!(controller.get_active(), None);
        assert_eq!(cache.get(ACTIVE_PROFILE_KEY), None);
        assert_eq!(controller.gate(), ViewGate::SignIn);
    }

    #[tokio::test]
    async fn test_loading_emission_does_not_touch_slot() {
        let (store, cache, controller) = setup();
        let acc = AccountId::new("acc1");
        let profiles = seed(&store, &acc, &["A"]).await;
        sign_in(&controller, &acc).await;

        let loading = SessionState {
            account: Some(acc.clone()),
            loading: true,
        };
        assert!(controller.observe(&loading).is_none());
        assert_eq!(controller.get_active(), Some(profiles[0].clone()));
        assert_eq!(cached(&cache), Some(profiles[0].clone()));
        assert_eq!(controller.gate(), ViewGate::Loading);

        // Same account after loading: no new fetch.
        assert!(controller
            .observe(&SessionState::signed_in(acc.clone()))
            .is_none());
        assert_eq!(controller.gate(), ViewGate::Ready(profiles[0].clone()));
    }

    #[tokio::test]
    async fn test_stale_fetch_is_discarded() {
        let (store, cache, controller) = setup();
        let acc1 = AccountId::new("acc1");
        let acc2 = AccountId::new("acc2");
        let p1 = seed(&store, &acc1, &["One"]).await;
        let p2 = seed(&store, &acc2, &["Two"]).await;
        store.hold_list(&acc1);
        store.hold_list(&acc2);

        let first = controller
            .observe(&SessionState::signed_in(acc1.clone()))
            .unwrap();
        let second = controller
            .observe(&SessionState::signed_in(acc2.clone()))
            .unwrap();
        assert_eq!(controller.gate(), ViewGate::Loading);

        store.release_list(&acc2);
        second.await.unwrap();
        assert_eq!(controller.get_active(), Some(p2[0].clone()));

        store.release_list(&acc1);
        first.await.unwrap();
        assert_eq!(controller.get_active(), Some(p2[0].clone()));
        assert_eq!(cached(&cache), Some(p2[0].clone()));
        assert_ne!(controller.get_active(), Some(p1[0].clone()));
    }

    #[tokio::test]
    async fn test_account_switch_discards_previous_slot_before_fetch() {
        let (store, _cache, controller) = setup();
        let acc1 = AccountId::new("acc1");
        let acc2 = AccountId::new("acc2");
        seed(&store, &acc1, &["One"]).await;
        seed(&store, &acc2, &["Two"]).await;
        sign_in(&controller, &acc1).await;
        store.hold_list(&acc2);

        let pending = controller
            .observe(&SessionState::signed_in(acc2.clone()))
            .unwrap();
        assert_eq!(controller.get_active(), None);
        assert!(controller.profiles().is_empty());

        store.release_list(&acc2);
        pending.await.unwrap();
        assert_eq!(controller.get_active().unwrap().name, "Two");
    }

    #[tokio::test]
    async fn test_local_delete_supersedes_in_flight_refresh() {
        let (store, _cache, controller) = setup();
        let acc = AccountId::new("acc1");
        let profiles = seed(&store, &acc, &["A", "B", "C"]).await;
        sign_in(&controller, &acc).await;

        // The refresh reads all three profiles, then stalls.
        store.hold_list(&acc);
        let stale = controller.refresh().unwrap();
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }

        controller
            .delete_profile(profiles[2].id.as_deref().unwrap())
            .await
            .unwrap();
        store.release_list(&acc);
        stale.await.unwrap();

        let snapshot = controller.settled().await;
        assert_eq!(controller.profiles(), profiles[..2].to_vec());
        assert_eq!(snapshot.active, Some(profiles[0].clone()));
    }

    #[tokio::test]
    async fn test_local_update_survives_in_flight_refresh() {
        let (store, _cache, controller) = setup();
        let acc = AccountId::new("acc1");
        let profiles = seed(&store, &acc, &["A", "B"]).await;
        sign_in(&controller, &acc).await;

        store.hold_list(&acc);
        let stale = controller.refresh().unwrap();
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }

        let patch = ProfilePatch {
            name: Some("B2".to_string()),
            ..Default::default()
        };
        controller
            .update_profile(profiles[1].id.as_deref().unwrap(), patch)
            .await
            .unwrap();
        store.release_list(&acc);
        stale.await.unwrap();

        let snapshot = controller.settled().await;
        assert_eq!(controller.profiles()[1].name, "B2");
        assert_eq!(snapshot.active, Some(profiles[0].clone()));
    }

    #[tokio::test]
    async fn test_update_active_success_writes_through() {
        let (store, cache, controller) = setup();
        let acc = AccountId::new("acc1");
        seed(&store, &acc, &["A", "B"]).await;
        sign_in(&controller, &acc).await;

        let patch = ProfilePatch {
            name: Some("X".to_string()),
            ..Default::default()
        };
        let updated = controller.update_active(patch).await.unwrap();

        assert_eq!(updated.name, "X");
        assert_eq!(controller.get_active().unwrap().name, "X");
        assert_eq!(cached(&cache), controller.get_active());
        assert_eq!(store.db.list(&acc).await.unwrap()[0].name, "X");
        assert_eq!(controller.profiles()[0].name, "X");
    }

    #[tokio::test]
    async fn test_update_active_failure_leaves_state_untouched() {
        let (store, cache, controller) = setup();
        let acc = AccountId::new("acc1");
        seed(&store, &acc, &["A"]).await;
        sign_in(&controller, &acc).await;

        let before_active = controller.get_active();
        let before_cache = cache.get(ACTIVE_PROFILE_KEY);
        store.fail.store(true, Ordering::SeqCst);

        let result = controller
            .update_active(ProfilePatch {
                name: Some("X".to_string()),
                ..Default::default()
            })
            .await;

        assert!(matches!(result, Err(ProfileError::BackendUnavailable(_))));
        assert_eq!(controller.get_active(), before_active);
        assert_eq!(cache.get(ACTIVE_PROFILE_KEY), before_cache);
    }

    #[tokio::test]
    async fn test_update_active_requires_slot() {
        let (_store, _cache, controller) = setup();
        let patch = ProfilePatch {
            avatar_id: Some(2),
            ..Default::default()
        };
        let result = controller.update_active(patch.clone()).await;
        assert_eq!(result, Err(ProfileError::NoActiveProfile));

        sign_in(&controller, &AccountId::new("acc1")).await;
        let result = controller.update_active(patch).await;
        assert_eq!(result, Err(ProfileError::NoActiveProfile));
    }

    #[tokio::test]
    async fn test_update_rejects_unknown_avatar() {
        let (store, _cache, controller) = setup();
        let acc = AccountId::new("acc1");
        seed(&store, &acc, &["A"]).await;
        sign_in(&controller, &acc).await;

        let result = controller
            .update_active(ProfilePatch {
                avatar_id: Some(42),
                ..Default::default()
            })
            .await;
        assert!(matches!(result, Err(ProfileError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_update_of_vanished_profile_triggers_refresh() {
        let (store, cache, controller) = setup();
        let acc = AccountId::new("acc1");
        let profiles = seed(&store, &acc, &["A", "B"]).await;
        sign_in(&controller, &acc).await;

        // Removed behind the controller's back.
        let active_id = profiles[0].id.clone().unwrap();
        store.db.delete(&acc, &active_id).await.unwrap();

        let result = controller
            .update_active(ProfilePatch {
                name: Some("X".to_string()),
                ..Default::default()
            })
            .await;
        assert!(matches!(result, Err(ProfileError::NotFound(_))));

        let snapshot = controller.settled().await;
        assert_eq!(snapshot.active, Some(profiles[1].clone()));
        assert_eq!(cached(&cache), Some(profiles[1].clone()));
    }

    #[tokio::test]
    async fn test_update_is_serialized_against_selection() {
        let (store, _cache, controller) = setup();
        let acc = AccountId::new("acc1");
        let profiles = seed(&store, &acc, &["A", "B"]).await;
        sign_in(&controller, &acc).await;
        let gate = store.hold_updates();

        let c = controller.clone();
        let update = tokio::spawn(async move {
            c.update_active(ProfilePatch {
                name: Some("A2".to_string()),
                ..Default::default()
            })
            .await
        });
        tokio::task::yield_now().await;

        let c = controller.clone();
        let b = profiles[1].clone();
        let select = tokio::spawn(async move { c.set_active(Some(b)).await });
        tokio::task::yield_now().await;
        assert!(!select.is_finished());

        gate.notify_one();
        let updated = update.await.unwrap().unwrap();
        select.await.unwrap();

        assert_eq!(updated.name, "A2");
        assert_eq!(controller.get_active(), Some(profiles[1].clone()));
        assert_eq!(controller.profiles()[0].name, "A2");
    }

    #[tokio::test]
    async fn test_delete_active_profile_clears_slot() {
        let (store, cache, controller) = setup();
        let acc = AccountId::new("acc1");
        let profiles = seed(&store, &acc, &["A", "B"]).await;
        sign_in(&controller, &acc).await;

        let id = profiles[0].id.clone().unwrap();
        controller.delete_profile(&id).await.unwrap();

        assert_eq!(controller.get_active(), None);
        assert_eq!(cache.get(ACTIVE_PROFILE_KEY), None);
        assert_eq!(controller.profiles(), vec![profiles[1].clone()]);
    }

    #[tokio::test]
    async fn test_delete_other_profile_keeps_slot() {
        let (store, _cache, controller) = setup();
        let acc = AccountId::new("acc1");
        let profiles = seed(&store, &acc, &["A", "B"]).await;
        sign_in(&controller, &acc).await;

        controller
            .delete_profile(profiles[1].id.as_deref().unwrap())
            .await
            .unwrap();
        assert_eq!(controller.get_active(), Some(profiles[0].clone()));
    }

    #[tokio::test]
    async fn test_create_beyond_cap_fails_without_side_effects() {
        let (store, cache, controller) = setup();
        let acc = AccountId::new("acc1");
        seed(&store, &acc, &["A", "B", "C"]).await;
        sign_in(&controller, &acc).await;
        let before_profiles = controller.profiles();
        let before_active = controller.get_active();
        let before_cache = cache.get(ACTIVE_PROFILE_KEY);

        let result = controller.create_profile(new_child("D")).await;

        assert_eq!(result, Err(ProfileError::LimitExceeded { limit: 3 }));
        assert_eq!(controller.profiles(), before_profiles);
        assert_eq!(controller.get_active(), before_active);
        assert_eq!(cache.get(ACTIVE_PROFILE_KEY), before_cache);
        assert_eq!(store.db.list(&acc).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_first_created_profile_becomes_active() {
        let (_store, cache, controller) = setup();
        let acc = AccountId::new("acc1");
        sign_in(&controller, &acc).await;

        let created = controller.create_profile(new_child(" Lu ")).await.unwrap();
        assert_eq!(created.name, "Lu");
        assert_eq!(created.avatar_id, Some(5));
        assert_eq!(controller.get_active(), Some(created.clone()));
        assert_eq!(cached(&cache), Some(created.clone()));

        let second = controller.create_profile(new_child("Max")).await.unwrap();
        assert_eq!(controller.get_active(), Some(created));
        assert_eq!(controller.profiles().len(), 2);
        assert_eq!(controller.profiles()[1], second);
    }

    #[tokio::test]
    async fn test_mutations_require_account() {
        let (_store, _cache, controller) = setup();
        controller.observe(&SessionState::signed_out());

        assert_eq!(
            controller.create_profile(new_child("A")).await,
            Err(ProfileError::NotSignedIn)
        );
        assert_eq!(
            controller.delete_profile("x").await,
            Err(ProfileError::NotSignedIn)
        );
        assert_eq!(
            controller.select_profile("x").await,
            Err(ProfileError::NotSignedIn)
        );
    }

    #[tokio::test]
    async fn test_select_profile_writes_cache() {
        let (store, cache, controller) = setup();
        let acc = AccountId::new("acc1");
        let profiles = seed(&store, &acc, &["A", "B"]).await;
        sign_in(&controller, &acc).await;

        let id = profiles[1].id.clone().unwrap();
        controller.select_profile(&id).await.unwrap();
        assert_eq!(cached(&cache), Some(profiles[1].clone()));

        assert!(matches!(
            controller.select_profile("missing").await,
            Err(ProfileError::NotFound(_))
        ));
        assert_eq!(controller.get_active(), Some(profiles[1].clone()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_interleaved_sign_ins_end_on_current_account() {
        use crate::models::Account;
        use crate::services::session::SessionManager;
        use std::time::Duration;

        let (store, _cache, controller) = setup();
        let session = SessionManager::new();
        // Registered first and slow for "a", widening the delivery window.
        let _slow = session.subscribe(Arc::new(|s: &SessionState| {
            if s.account == Some(AccountId::new("a")) {
                std::thread::sleep(Duration::from_millis(100));
            }
        }));
        let _subscription = controller.attach(&session);

        let a = AccountId::new("a");
        let b = AccountId::new("b");
        seed(&store, &a, &["From A"]).await;
        seed(&store, &b, &["From B"]).await;

        let sign_in_as = |uid: &AccountId| {
            let session = session.clone();
            let account = Account {
                uid: uid.clone(),
                email: format!("{}@example.com", uid),
            };
            tokio::task::spawn_blocking(move || session.sign_in(account))
        };
        let first = sign_in_as(&a);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = sign_in_as(&b);
        first.await.unwrap();
        second.await.unwrap();

        let snapshot = controller.settled().await;
        let current = session.state().account;
        assert_eq!(snapshot.account, current);
        let expected = if current == Some(a) { "From A" } else { "From B" };
        assert_eq!(snapshot.active.unwrap().name, expected);
    }

    #[tokio::test]
    async fn test_attach_follows_session_source() {
        use crate::models::Account;
        use crate::services::session::SessionManager;

        let (store, cache, controller) = setup();
        let session = SessionManager::new();
        let _subscription = controller.attach(&session);
        assert_eq!(controller.gate(), ViewGate::Loading);

        let acc = AccountId::new("acc1");
        let profiles = seed(&store, &acc, &["A"]).await;
        session.sign_in(Account {
            uid: acc.clone(),
            email: "p@example.com".to_string(),
        });
        let snapshot = controller.settled().await;
        assert_eq!(snapshot.active, Some(profiles[0].clone()));

        session.sign_out();
        assert_eq!(controller.get_active(), None);
        assert_eq!(cache.get(ACTIVE_PROFILE_KEY), None);
    }
}
