// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Module
//!
//! One data-operation surface over three interchangeable backends, and the
//! orchestration that moves between them.
//!
//! ## Backends
//!
//! | Mode | Adapter | Writes |
//! |------|---------|--------|
//! | `local` | [`LocalApiAdapter`] (vault REST API) | immediate |
//! | `filesystem` | [`FilesystemAdapter`] (JSON files) | immediate |
//! | `cloud` | [`CloudDriveAdapter`] (drive snapshot) | buffered until sync |
//!
//! ## Security Model
//!
//! - Every record is sealed before it reaches a backend
//! - Personal scope records use the personal key, shared workspace records
//!   the workspace key
//! - Key caches are cleared around every workspace switch so a key never
//!   crosses scopes
//!
//! ## Local Layout
//!
//! ```text
//! {DATA_DIR}/
//!   preferences.json                         # storage mode choice
//!   personal/{collection}/{id}.json          # filesystem mode
//!   workspaces/{workspace_id}/{collection}/{id}.json
//! ```

pub mod adapter;
pub mod cloud;
pub mod error;
pub mod filesystem;
pub mod local_api;
pub mod orchestrator;
pub mod paths;
pub mod prefs;
pub mod registry;
pub mod types;

pub use adapter::{AdapterFactory, BackendFactory, BackendSettings, RecordSealer, StorageAdapter};
pub use cloud::CloudDriveAdapter;
pub use error::{StorageError, StorageResult};
pub use filesystem::FilesystemAdapter;
pub use local_api::LocalApiAdapter;
pub use orchestrator::StorageOrchestrator;
pub use paths::StoragePaths;
pub use prefs::PreferenceStore;
pub use registry::WorkspaceRegistry;
pub use types::{StorageConfig, StorageMode, StoredRecord, WorkspaceContext};
