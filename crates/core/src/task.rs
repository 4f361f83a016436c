// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pending tasks: sessions queued but not yet started.

use crate::build::BuildId;
use crate::session::SessionName;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One row in the pending table.
///
/// The unresolved set shrinks as dependencies finish; a task with an empty
/// set is ready for the scheduler. The row is removed when the session
/// starts running or is finalized without execution (cache hit, no-build,
/// cancel).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTask {
    /// Session name (unique key)
    pub name: SessionName,
    /// Dependency names without a recorded result yet
    pub unresolved: BTreeSet<SessionName>,
    /// Opaque scheduling metadata, passed through the store untouched
    pub metadata: serde_json::Value,
    /// Owning build
    pub build_id: BuildId,
}

impl PendingTask {
    pub fn new(name: SessionName, deps: BTreeSet<SessionName>, build_id: BuildId) -> Self {
        Self {
            name,
            unresolved: deps,
            metadata: serde_json::Value::Null,
            build_id,
        }
    }

    /// A task is ready once every dependency has resolved.
    pub fn is_ready(&self) -> bool {
        self.unresolved.is_empty()
    }

    /// Drop `dep` from the unresolved set. Returns true if it was present.
    pub fn resolve(&mut self, dep: &SessionName) -> bool {
        self.unresolved.remove(dep)
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
