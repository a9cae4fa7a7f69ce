// SPDX-License-Identifier: MIT
// Copyright 2026 Lumini contributors

//! Data models for the application.

pub mod child;
pub mod user;

pub use child::{ChildProfile, LimitationType, NewChildProfile, ProfilePatch, Sex};
pub use user::{Account, AccountId, User};
