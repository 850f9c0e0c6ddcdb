// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Workspace registry: resolves workspace ids to contexts and publishes the
//! active one.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::watch;
use tracing::debug;

use super::types::WorkspaceContext;
use super::{StorageError, StorageResult};
use crate::identity::{IdentityError, WorkspaceApi};

pub struct WorkspaceRegistry {
    api: Arc<dyn WorkspaceApi>,
    known: RwLock<HashMap<String, WorkspaceContext>>,
    active: watch::Sender<WorkspaceContext>,
}

impl WorkspaceRegistry {
    pub fn new(api: Arc<dyn WorkspaceApi>) -> Self {
        let (active, _) = watch::channel(WorkspaceContext::Personal);
        Self {
            api,
            known: RwLock::new(HashMap::new()),
            active,
        }
    }

    /// Add or replace a workspace entry locally.
    pub fn register(&self, context: WorkspaceContext) {
        if let Some(id) = context.id() {
            let id = id.to_string();
            self.known
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(id, context);
        }
    }

    /// Context for `workspace_id`: `None` is the personal scope.
    ///
    /// Unknown ids are looked up at the identity boundary once and
    /// remembered.
    pub async fn resolve(&self, workspace_id: Option<&str>) -> StorageResult<WorkspaceContext> {
        let Some(id) = workspace_id else {
            return Ok(WorkspaceContext::Personal);
        };
        if let Some(known) = self
            .known
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
        {
            return Ok(known);
        }

        match self.api.fetch_workspace(id).await {
            Ok(Some(record)) => {
                let context = WorkspaceContext::from(record);
                self.register(context.clone());
                debug!(workspace_id = id, "Workspace resolved from registry");
                Ok(context)
            }
            Ok(None) | Err(IdentityError::NotFound(_)) => {
                Err(StorageError::WorkspaceNotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn active(&self) -> WorkspaceContext {
        self.active.borrow().clone()
    }

    /// Observe active-workspace changes.
    pub fn subscribe(&self) -> watch::Receiver<WorkspaceContext> {
        self.active.subscribe()
    }

    pub(crate) fn set_active(&self, context: WorkspaceContext) {
        self.active.send_replace(context);
    }
}
