// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Running jobs and placement slots.

use crate::build::BuildId;
use crate::session::SessionName;
use crate::worker::WorkerId;
use serde::{Deserialize, Serialize};

/// Assignment of a job to a host and an optional locality slot.
///
/// The node index is a NUMA-like slot; the scheduler rotates a cursor over
/// the configured slots so concurrent jobs spread out instead of piling onto
/// node 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    /// Hostname the job runs on
    pub host: String,
    /// Locality slot index, when node binding is configured
    pub node: Option<usize>,
}

impl Placement {
    pub fn new(host: impl Into<String>, node: Option<usize>) -> Self {
        Self { host: host.into(), node }
    }

    /// Placement with no node binding.
    pub fn unbound(host: impl Into<String>) -> Self {
        Self { host: host.into(), node: None }
    }
}

/// One row in the running table.
///
/// The handle to the external process exists only inside the engine of the
/// worker that spawned the job; other workers observe this row without one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningJob {
    /// Session name (unique key)
    pub name: SessionName,
    /// Worker that owns the external process
    pub worker: WorkerId,
    /// Owning build
    pub build_id: BuildId,
    /// Where the job was placed
    pub placement: Placement,
    /// Start timestamp (epoch ms), used for timeout enforcement
    pub started_at: u64,
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
