// SPDX-License-Identifier: MIT
// Copyright 2026 Lumini contributors

//! Static avatar catalog and scene portraits.

use crate::models::child::Sex;
use serde::Serialize;

/// One selectable avatar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Avatar {
    pub id: u32,
    pub src: &'static str,
    pub alt: &'static str,
}

/// The fixed avatar catalog. Entry 0 is the fallback for unknown ids.
pub const AVATARS: [Avatar; 7] = [
    Avatar {
        id: 1,
        src: "/avatars/nino1.webp",
        alt: "Niño Avatar 1",
    },
    Avatar {
        id: 2,
        src: "/avatars/nino2.webp",
        alt: "Niño Avatar 2",
    },
    Avatar {
        id: 3,
        src: "/avatars/nina1.webp",
        alt: "Niña Avatar 1",
    },
    Avatar {
        id: 4,
        src: "/avatars/nina2.webp",
        alt: "Niña Avatar 2",
    },
    Avatar {
        id: 5,
        src: "/avatars/nina3.webp",
        alt: "Niña Avatar 3",
    },
    Avatar {
        id: 6,
        src: "/avatars/nina4.webp",
        alt: "Niña Avatar 4",
    },
    Avatar {
        id: 7,
        src: "/avatars/nino1.webp",
        alt: "No Binario Avatar 1",
    },
];

/// Resolve an avatar id to its image path. Never fails.
pub fn avatar_src(id: Option<u32>) -> &'static str {
    find(id).unwrap_or(&AVATARS[0]).src
}

/// Look up an avatar by id.
pub fn find(id: Option<u32>) -> Option<&'static Avatar> {
    let id = id?;
    AVATARS.iter().find(|a| a.id == id)
}

/// Whether `id` names a catalog entry.
pub fn is_known(id: u32) -> bool {
    find(Some(id)).is_some()
}

/// Avatar assigned at creation when none was chosen.
pub fn default_avatar_id(sex: Sex) -> u32 {
    match sex {
        Sex::Male => 1,
        Sex::Female => 3,
        Sex::Unspecified => 5,
    }
}

/// Full-body portrait used by the activity and game scenes.
pub fn scene_portrait(sex: Sex) -> &'static str {
    match sex {
        Sex::Male => "/actividades/hombre.webp",
        Sex::Female => "/actividades/mujer.webp",
        Sex::Unspecified => "/actividades/no-binario.webp",
    }
}
