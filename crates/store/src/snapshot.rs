// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Read-only view of the whole store, for status output and monitoring.

use kiln_core::{
    BuildId, BuildRecord, PendingTask, ProgressMessage, RunningJob, SessionMeta, SessionName,
    SessionResult, WorkerId, WorkerRecord,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Everything the store holds, as of one locked read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub serial: u64,
    pub builds: BTreeMap<BuildId, BuildRecord>,
    pub workers: BTreeMap<WorkerId, WorkerRecord>,
    pub progress: Vec<ProgressMessage>,
    pub sessions: BTreeMap<SessionName, SessionMeta>,
    pub pending: BTreeMap<SessionName, PendingTask>,
    pub running: BTreeMap<SessionName, RunningJob>,
    pub results: Vec<SessionResult>,
}

impl StoreSnapshot {
    /// Workers of `build` that have not recorded an orderly stop.
    pub fn active_workers<'a>(
        &'a self,
        build: &'a BuildId,
    ) -> impl Iterator<Item = &'a WorkerRecord> + 'a {
        self.workers
            .values()
            .filter(move |w| w.build_id == *build && w.stopped_at.is_none())
    }

    /// Results of `build`, keyed by session name.
    pub fn results_for(&self, build: &BuildId) -> BTreeMap<&SessionName, &SessionResult> {
        self.results
            .iter()
            .filter(|r| r.build_id == *build)
            .map(|r| (&r.name, r))
            .collect()
    }
}
