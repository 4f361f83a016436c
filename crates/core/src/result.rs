// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session results: the write-once outcome of a session within a build.

use crate::build::BuildId;
use crate::hash::ContentHash;
use crate::job::Placement;
use crate::session::SessionName;
use crate::worker::WorkerId;
use serde::{Deserialize, Serialize};

/// Final status of a session within a build.
///
/// `Cancelled` is distinct from `Failed`: it means the build chose not to
/// run the session (stop signal, failed ancestor, no-build mode), not that
/// the session itself could not build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Ok,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_ok(self) -> bool {
        matches!(self, SessionStatus::Ok)
    }

    /// Map a process exit code to a status.
    pub fn from_exit_code(code: i32) -> Self {
        if code == 0 {
            SessionStatus::Ok
        } else {
            SessionStatus::Failed
        }
    }
}

crate::simple_display! {
    SessionStatus {
        Ok => "ok",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

/// Timing of one external job run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    /// Wall-clock time
    pub elapsed_ms: u64,
    /// CPU time across all threads
    pub cpu_ms: u64,
    /// Time spent in the collector, when the job reports it
    pub gc_ms: u64,
}

/// One row in the results table. Write-once per (session, build).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionResult {
    /// Session name (unique key)
    pub name: SessionName,
    /// Worker that recorded the result
    pub worker: WorkerId,
    /// Owning build
    pub build_id: BuildId,
    /// Where the job ran (host of the recording worker for unexecuted results)
    pub placement: Placement,
    /// Final status
    pub status: SessionStatus,
    /// Raw process exit code (0 for cache hits, None when nothing ran)
    pub exit_code: Option<i32>,
    /// Captured output lines (stdout and stderr interleaved)
    pub output: Vec<String>,
    /// Timing of the run (zeroed when nothing ran)
    pub timing: Timing,
    /// Fingerprint of the session's option settings at build time
    pub options_hash: ContentHash,
    /// Hash of the session's sources at build time
    pub sources_hash: ContentHash,
    /// Combined hash of ancestor outputs this session was built against
    pub input_hash: ContentHash,
    /// Hash of the produced output
    pub output_hash: ContentHash,
    /// True when this result is a cache hit and nothing was executed
    pub current: bool,
}

impl SessionResult {
    /// Whether a dependent may treat this result as a valid cached ancestor.
    pub fn is_current_ok(&self) -> bool {
        self.current && self.status.is_ok()
    }
}

crate::builder! {
    pub struct SessionResultBuilder => SessionResult {
        into {
            name: SessionName = "s",
            worker: WorkerId = WorkerId::from_string("wkr-test"),
            build_id: BuildId = BuildId::from_string("bld-test"),
            options_hash: ContentHash = ContentHash::of_str("options"),
            sources_hash: ContentHash = ContentHash::of_str("sources"),
            input_hash: ContentHash = ContentHash::bootstrap(),
            output_hash: ContentHash = ContentHash::of_str("output"),
        }
        set {
            status: SessionStatus = SessionStatus::Ok,
            exit_code: Option<i32> = Some(0),
            output: Vec<String> = Vec::new(),
            timing: Timing = Timing::default(),
            current: bool = false,
        }
        computed {
            placement: Placement = Placement::unbound("testhost"),
        }
    }
}

#[cfg(test)]
#[path = "result_tests.rs"]
mod tests;
