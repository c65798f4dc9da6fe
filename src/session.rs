// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Registry of running bot sessions.
//!
//! The process that hosts bots keeps one [`SessionRegistry`] and passes it
//! (or a clone) to whatever accepts new sessions. Clones share the same
//! table.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::SessionError;
use crate::pipeline::PipelineTaskHandle;

/// Running sessions, keyed by session id.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<String, PipelineTaskHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, PipelineTaskHandle>> {
        self.sessions.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Register the task running session `id`.
    pub fn create(&self, id: impl Into<String>, handle: PipelineTaskHandle) -> Result<(), SessionError> {
        let id = id.into();
        let mut sessions = self.table();
        if sessions.contains_key(&id) {
            return Err(SessionError::AlreadyExists(id));
        }
        tracing::info!(session = %id, task = %handle.name(), "session created");
        sessions.insert(id, handle);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<PipelineTaskHandle> {
        self.table().get(id).cloned()
    }

    /// Unregister session `id` and cancel its task.
    pub fn remove(&self, id: &str) -> Result<PipelineTaskHandle, SessionError> {
        let handle = self
            .table()
            .remove(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        handle.cancel(Some(format!("session {id} removed")));
        tracing::info!(session = %id, "session removed");
        Ok(handle)
    }

    /// Drop sessions whose tasks have already been cancelled.
    pub fn prune_cancelled(&self) -> usize {
        let mut sessions = self.table();
        let before = sessions.len();
        sessions.retain(|_, handle| !handle.is_cancelled());
        before - sessions.len()
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.table().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }
}
