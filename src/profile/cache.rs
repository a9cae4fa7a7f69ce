// SPDX-License-Identifier: MIT
// Copyright 2026 Lumini contributors

//! Local key-value persistence for the active profile slot.
//!
//! The file-backed cache keeps a small JSON object on disk, the same role
//! browser local storage plays for a client-side app. Reads never fail:
//! missing or unreadable content is reported as absent.

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Key under which the active child profile is mirrored.
pub const ACTIVE_PROFILE_KEY: &str = "activeChildProfile";

/// Key under which the signed-in account is persisted across restarts.
pub const SESSION_KEY: &str = "authSession";

/// Key-value slot storage. Failures are logged, never surfaced.
pub trait LocalCache: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// In-memory cache, used by tests and the memory backend.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, String>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalCache for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    fn set(&self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.entries.remove(key);
    }
}

/// JSON-file backed cache (`{data_dir}/local_storage.json`).
pub struct FileCache {
    path: PathBuf,
    // Serializes read-modify-write cycles on the file.
    write_lock: Mutex<()>,
}

impl FileCache {
    pub const FILE_NAME: &'static str = "local_storage.json";

    /// Open (lazily) the cache file inside `data_dir`, creating the directory.
    pub fn open<P: AsRef<Path>>(data_dir: P) -> std::io::Result<Self> {
        fs::create_dir_all(data_dir.as_ref())?;
        let path = data_dir.as_ref().join(Self::FILE_NAME);
        tracing::info!(path = %path.display(), "Local cache ready");
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> BTreeMap<String, String> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
            Err(e) => {
                tracing::warn!(error = %e, path = %self.path.display(), "Failed to read local cache");
                return BTreeMap::new();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Local cache file is corrupt, starting empty");
            BTreeMap::new()
        })
    }

    fn store(&self, entries: &BTreeMap<String, String>) {
        let result = serde_json::to_string_pretty(entries)
            .map_err(std::io::Error::other)
            .and_then(|json| {
                let tmp = self.path.with_extension("json.tmp");
                fs::write(&tmp, json)?;
                fs::rename(&tmp, &self.path)
            });
        if let Err(e) = result {
            tracing::error!(error = %e, path = %self.path.display(), "Failed to write local cache");
        }
    }

    fn modify(&self, f: impl FnOnce(&mut BTreeMap<String, String>)) {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut entries = self.load();
        f(&mut entries);
        self.store(&entries);
    }
}

impl LocalCache for FileCache {
    fn get(&self, key: &str) -> Option<String> {
        self.load().remove(key)
    }

    fn set(&self, key: &str, value: &str) {
        self.modify(|entries| {
            entries.insert(key.to_string(), value.to_string());
        });
    }

    fn remove(&self, key: &str) {
        self.modify(|entries| {
            entries.remove(key);
        });
    }
}
