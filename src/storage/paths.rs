// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Path layout for filesystem mode and the preference file.

use std::path::{Path, PathBuf};

use super::prefs::PREFERENCES_FILE;

/// Default data directory, relative to the working directory.
pub const DATA_ROOT: &str = "./data";

/// Storage path utilities for the local data directory.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    root: PathBuf,
}

impl Default for StoragePaths {
    fn default() -> Self {
        Self::new(DATA_ROOT)
    }
}

impl StoragePaths {
    /// Create a new StoragePaths with a custom root (useful for testing).
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Root directory for all local data.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to the non-secret preference file.
    pub fn preferences(&self) -> PathBuf {
        self.root.join(PREFERENCES_FILE)
    }

    // ========== Scope Paths ==========

    /// Directory holding the personal scope.
    pub fn personal_dir(&self) -> PathBuf {
        self.root.join("personal")
    }

    /// Directory containing all shared workspaces.
    pub fn workspaces_dir(&self) -> PathBuf {
        self.root.join("workspaces")
    }

    /// Directory for one scope: personal when `workspace_id` is `None`.
    pub fn scope_dir(&self, workspace_id: Option<&str>) -> PathBuf {
        match workspace_id {
            Some(id) => self.workspaces_dir().join(id),
            None => self.personal_dir(),
        }
    }

    // ========== Record Paths ==========

    /// Directory for a collection inside a scope.
    pub fn collection_dir(&self, workspace_id: Option<&str>, collection: &str) -> PathBuf {
        self.scope_dir(workspace_id).join(collection)
    }

    /// Path to a specific record file.
    pub fn record(&self, workspace_id: Option<&str>, collection: &str, id: &str) -> PathBuf {
        self.collection_dir(workspace_id, collection)
            .join(format!("{id}.json"))
    }
}
