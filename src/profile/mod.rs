// SPDX-License-Identifier: MIT
// Copyright 2026 Lumini contributors

//! Active child profile synchronization.

pub mod cache;
pub mod controller;
pub mod gate;
pub mod store;

pub use cache::{FileCache, LocalCache, MemoryCache, ACTIVE_PROFILE_KEY};
pub use controller::{reconcile_slot, ActiveProfileController, ProfileSnapshot};
pub use gate::ViewGate;
pub use store::{ProfileError, ProfileStore};
