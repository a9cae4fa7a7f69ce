// SPDX-License-Identifier: MIT
// Copyright 2026 Lumini contributors

//! Three-way gate applied by every consuming view.

use crate::models::ChildProfile;
use crate::profile::controller::ProfileSnapshot;

/// Outcome of the gate for a view that needs an active child profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewGate {
    /// Session loading or profile fetch in flight; show a loading indicator.
    Loading,
    /// No account; redirect to sign-in.
    SignIn,
    /// Signed in but no active profile; redirect to profile selection.
    SelectProfile,
    /// Render with this profile.
    Ready(ChildProfile),
}

impl ViewGate {
    pub fn evaluate(snapshot: &ProfileSnapshot) -> Self {
        if snapshot.loading || snapshot.fetching {
            return ViewGate::Loading;
        }
        if snapshot.account.is_none() {
            return ViewGate::SignIn;
        }
        match &snapshot.active {
            Some(profile) => ViewGate::Ready(profile.clone()),
            None => ViewGate::SelectProfile,
        }
    }
}
