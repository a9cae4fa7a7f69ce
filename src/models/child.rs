// SPDX-License-Identifier: MIT
// Copyright 2026 Lumini contributors

//! Child profile model for storage, cache and API.

use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use crate::avatars;

/// Maximum number of child profiles an account may own.
pub const MAX_CHILD_PROFILES: usize = 3;

/// Longest accepted display name (in characters).
pub const MAX_NAME_CHARS: usize = 40;

/// Presumed sex of a child, used for avatar and portrait defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    #[serde(alias = "hombre")]
    Male,
    #[serde(alias = "mujer")]
    Female,
    #[serde(alias = "prefiero no decirlo")]
    Unspecified,
}

/// Disability classification. Only one kind is supported today.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "lowercase")]
pub enum LimitationType {
    #[default]
    #[serde(alias = "tdha")]
    Adhd,
}

/// A child profile stored under `users/{uid}/children/{id}`.
///
/// The same JSON shape is mirrored into the local cache for the active slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "camelCase")]
pub struct ChildProfile {
    /// Document ID, assigned by the store on creation
    #[serde(alias = "_firestore_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Display name
    pub name: String,
    pub sex: Sex,
    #[serde(default)]
    pub limitation_type: LimitationType,
    /// Avatar catalog reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_id: Option<u32>,
}

impl ChildProfile {
    /// Image path for this profile's avatar, falling back to the sex default.
    pub fn avatar_src(&self) -> &'static str {
        let id = self
            .avatar_id
            .unwrap_or_else(|| avatars::default_avatar_id(self.sex));
        avatars::avatar_src(Some(id))
    }

    /// Whether this profile carries the given document ID.
    pub fn has_id(&self, id: &str) -> bool {
        self.id.as_deref() == Some(id)
    }
}

/// Payload for creating a child profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "camelCase")]
pub struct NewChildProfile {
    pub name: String,
    pub sex: Sex,
    #[serde(default)]
    pub limitation_type: LimitationType,
    #[serde(default)]
    pub avatar_id: Option<u32>,
}

impl NewChildProfile {
    /// Check the name constraint and return a normalized copy.
    pub fn normalized(&self) -> Result<Self, String> {
        Ok(Self {
            name: normalize_name(&self.name)?,
            ..self.clone()
        })
    }

    /// Build the record to persist, applying the avatar default for the sex.
    pub fn into_profile(self) -> ChildProfile {
        let avatar_id = self
            .avatar_id
            .unwrap_or_else(|| avatars::default_avatar_id(self.sex));
        ChildProfile {
            id: None,
            name: self.name,
            sex: self.sex,
            limitation_type: self.limitation_type,
            avatar_id: Some(avatar_id),
        }
    }
}

/// Partial update of a child profile. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sex: Option<Sex>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limitation_type: Option<LimitationType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_id: Option<u32>,
}

impl ProfilePatch {
    pub fn is_empty(&self) -> bool {
        self.field_paths().is_empty()
    }

    /// Document field names touched by this patch (for masked updates).
    pub fn field_paths(&self) -> Vec<&'static str> {
        let mut paths = Vec::new();
        if self.name.is_some() {
            paths.push("name");
        }
        if self.sex.is_some() {
            paths.push("sex");
        }
        if self.limitation_type.is_some() {
            paths.push("limitationType");
        }
        if self.avatar_id.is_some() {
            paths.push("avatarId");
        }
        paths
    }

    /// Reject empty patches and blank names; trims the name.
    pub fn normalized(&self) -> Result<Self, String> {
        if self.is_empty() {
            return Err("Update must change at least one field".to_string());
        }
        let name = self.name.as_deref().map(normalize_name).transpose()?;
        Ok(Self {
            name,
            ..self.clone()
        })
    }

    /// Apply the patch on top of an existing profile.
    pub fn apply_to(&self, profile: &ChildProfile) -> ChildProfile {
        let mut merged = profile.clone();
        if let Some(name) = &self.name {
            merged.name = name.clone();
        }
        if let Some(sex) = self.sex {
            merged.sex = sex;
        }
        if let Some(limitation_type) = self.limitation_type {
            merged.limitation_type = limitation_type;
        }
        if let Some(avatar_id) = self.avatar_id {
            merged.avatar_id = Some(avatar_id);
        }
        merged
    }
}

fn normalize_name(name: &str) -> Result<String, String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err("Name must not be empty".to_string());
    }
    if trimmed.chars().count() > MAX_NAME_CHARS {
        return Err(format!("Name must be at most {} characters", MAX_NAME_CHARS));
    }
    Ok(trimmed.to_string())
}
