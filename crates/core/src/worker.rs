// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker identity and liveness records.

use crate::build::BuildId;
use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Unique identifier for a worker process participating in a build.
    pub struct WorkerId("wkr-");
}

/// One row in the workers table.
///
/// Updated on every synchronization cycle; external observers detect stalled
/// or crashed workers by stale `heartbeat_at` timestamps without any
/// process-level signaling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRecord {
    /// Worker id (unique key)
    pub id: WorkerId,
    /// Build this worker participates in
    pub build_id: BuildId,
    /// Hostname of the worker process
    pub host: String,
    /// OS process id
    pub pid: u32,
    /// Process start timestamp (epoch ms)
    pub process_started_at: u64,
    /// Registration timestamp (epoch ms)
    pub registered_at: u64,
    /// Last heartbeat timestamp (epoch ms)
    pub heartbeat_at: u64,
    /// Stop timestamp, set on orderly shutdown
    pub stopped_at: Option<u64>,
    /// Serial last observed by this worker
    pub last_serial: u64,
}

impl WorkerRecord {
    /// Milliseconds since the last heartbeat, as seen from `now`.
    pub fn heartbeat_age_ms(&self, now: u64) -> u64 {
        now.saturating_sub(self.heartbeat_at)
    }
}
