// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Durable, non-secret client preferences.
//!
//! A single JSON object of string keys written atomically (temp file +
//! rename). The storage-mode preference is the only value this core writes
//! here; the store is also where credential remnants of earlier client
//! versions are purged from.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde_json::Value;
use tracing::{debug, warn};

use super::types::StorageMode;
use super::StorageResult;

/// Key holding the user's storage-mode choice.
pub const STORAGE_MODE_KEY: &str = "storage_mode";

/// File name of the preference store inside the data directory.
pub const PREFERENCES_FILE: &str = "preferences.json";

/// JSON-file backed preference store.
#[derive(Debug)]
pub struct PreferenceStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within the process.
    lock: Mutex<()>,
}

impl PreferenceStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    /// Store located at `{data_dir}/preferences.json`.
    pub fn in_dir(data_dir: impl AsRef<Path>) -> Self {
        Self::new(data_dir.as_ref().join(PREFERENCES_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.load()?.remove(key))
    }

    pub fn set(&self, key: &str, value: Value) -> StorageResult<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.load()?;
        entries.insert(key.to_string(), value);
        self.save(&entries)
    }

    /// Remove the given keys. Returns how many were present.
    pub fn remove_keys(&self, keys: &[&str]) -> StorageResult<usize> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.load()?;
        let removed = keys
            .iter()
            .filter(|key| entries.remove(**key).is_some())
            .count();
        if removed > 0 {
            self.save(&entries)?;
        }
        Ok(removed)
    }

    /// Previously persisted storage-mode choice.
    ///
    /// An unreadable or unknown value is ignored (logged) rather than
    /// failing mode resolution.
    pub fn storage_mode(&self) -> Option<StorageMode> {
        match self.get(STORAGE_MODE_KEY) {
            Ok(Some(Value::String(raw))) => match raw.parse() {
                Ok(mode) => Some(mode),
                Err(e) => {
                    warn!(value = %raw, error = %e, "Ignoring unknown storage mode preference");
                    None
                }
            },
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "Failed to read storage mode preference");
                None
            }
        }
    }

    pub fn set_storage_mode(&self, mode: StorageMode) -> StorageResult<()> {
        debug!(mode = %mode, "Persisting storage mode preference");
        self.set(STORAGE_MODE_KEY, Value::String(mode.to_string()))
    }

    fn load(&self) -> StorageResult<BTreeMap<String, Value>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        let entries = serde_json::from_reader(BufReader::new(file))?;
        Ok(entries)
    }

    fn save(&self, entries: &BTreeMap<String, Value>) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write to temp file first, then rename for atomicity
        let temp_path = self.path.with_extension("tmp");
        {
            let file = File::create(&temp_path)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, entries)?;
            writer.flush()?;
        }
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}
