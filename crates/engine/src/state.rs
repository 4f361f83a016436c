// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory build state.
//!
//! Pure data transformations only: no store access, no process handles, no
//! clock. The synchronization protocol moves rows in and out; the scheduler
//! and the engine drive the transitions. Keeping this free of I/O makes the
//! queue semantics unit-testable on their own.

use kiln_core::{PendingTask, RunningJob, SessionMeta, SessionName, SessionResult};
use std::collections::BTreeMap;

/// The mutable model one worker keeps of the whole build.
#[derive(Debug, Clone, Default)]
pub struct BuildState {
    /// Session metadata, append-only cache keyed by name
    pub sessions: BTreeMap<SessionName, SessionMeta>,
    /// Queued tasks, mutated in place
    pub pending: BTreeMap<SessionName, PendingTask>,
    /// Running jobs across all workers, mutated in place
    pub running: BTreeMap<SessionName, RunningJob>,
    /// Recorded results, append-only cache keyed by name
    pub results: BTreeMap<SessionName, SessionResult>,
    /// Rotating placement cursor, shared through the store
    pub numa_next: usize,
    /// Serial of the last store state this worker observed
    pub serial: u64,
}

impl BuildState {
    /// A session is finished once its result is recorded.
    pub fn is_finished(&self, name: &SessionName) -> bool {
        self.results.contains_key(name)
    }

    pub fn is_running(&self, name: &SessionName) -> bool {
        self.running.contains_key(name)
    }

    /// Remove a completed dependency from every pending task's unresolved
    /// set. Called when `dep`'s result becomes visible.
    pub fn resolve(&mut self, dep: &SessionName) {
        for task in self.pending.values_mut() {
            task.resolve(dep);
        }
    }

    /// Take a session out of the queue: it started running, or was
    /// finalized without execution.
    pub fn remove_pending(&mut self, name: &SessionName) -> Option<PendingTask> {
        self.pending.remove(name)
    }

    /// Ready tasks: queued with every dependency resolved and not running.
    pub fn ready(&self) -> impl Iterator<Item = &PendingTask> {
        self.pending
            .values()
            .filter(|task| task.is_ready() && !self.is_running(&task.name))
    }

    pub fn add_running(&mut self, job: RunningJob) {
        self.running.insert(job.name.clone(), job);
    }

    pub fn remove_running(&mut self, name: &SessionName) -> Option<RunningJob> {
        self.running.remove(name)
    }

    /// Record a result and resolve the session everywhere it is still a
    /// dependency. Append-only: an existing result wins.
    pub fn record_result(&mut self, result: SessionResult) {
        let name = result.name.clone();
        self.results.entry(name.clone()).or_insert(result);
        self.resolve(&name);
    }

    /// Adopt the greater of local and remote serial.
    pub fn adopt_serial(&mut self, remote: u64) {
        self.serial = self.serial.max(remote);
    }

    /// The build is done when nothing is queued or running.
    pub fn is_done(&self) -> bool {
        self.pending.is_empty() && self.running.is_empty()
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
