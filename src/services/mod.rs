// SPDX-License-Identifier: MIT
// Copyright 2026 Lumini contributors

//! Services module - identity, session and parent access.

pub mod identity;
pub mod parent_access;
pub mod session;

pub use identity::{IdentityError, IdentityService};
pub use parent_access::{ParentAccess, ParentAccessError};
pub use session::{SessionManager, SessionSource, SessionState, Subscription};
