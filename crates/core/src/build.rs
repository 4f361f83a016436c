// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Build identity and the per-build record.

use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Unique identifier for one top-level build invocation.
    ///
    /// A build may span several cooperating worker processes; they all carry
    /// the same BuildId and converge through the shared store.
    pub struct BuildId("bld-");
}

/// One row in the builds table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRecord {
    /// Build id (unique key)
    pub id: BuildId,
    /// Platform descriptor of the initiating host (e.g. `x86_64-linux`)
    pub platform: String,
    /// Serialized snapshot of the build options
    pub options: String,
    /// Start timestamp (epoch ms)
    pub started_at: u64,
    /// Stop timestamp (epoch ms), set when the build finishes
    pub stopped_at: Option<u64>,
    /// Set when progress has been stopped; workers observing this flag
    /// cancel their running jobs and start nothing new
    pub progress_stopped: bool,
}

impl BuildRecord {
    pub fn new(id: BuildId, platform: impl Into<String>, options: impl Into<String>, started_at: u64) -> Self {
        Self {
            id,
            platform: platform.into(),
            options: options.into(),
            started_at,
            stopped_at: None,
            progress_stopped: false,
        }
    }

    /// A build is active until its stop timestamp is recorded.
    pub fn is_active(&self) -> bool {
        self.stopped_at.is_none()
    }
}
