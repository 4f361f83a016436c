// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lockfile-guarded table storage.
//!
//! One JSON file per logical table under the store directory. Every access
//! goes through a [`DbGuard`] holding an exclusive advisory lock, so a
//! pull/merge/push cycle sees and leaves consistent tables. Writes replace
//! the table file atomically (temp file + rename).

use crate::snapshot::StoreSnapshot;
use fs2::FileExt;
use kiln_core::{
    BuildId, BuildRecord, MessageKind, PendingTask, ProgressMessage, RunningJob, SessionMeta,
    SessionName, SessionResult, WorkerId, WorkerRecord,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("result for session {name} already recorded in build {build_id}")]
    DuplicateResult { name: SessionName, build_id: BuildId },
}

/// Monotonic counters and the shared placement cursor.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct Counters {
    /// Global serial: strictly increases whenever persisted state changes
    serial: u64,
    /// Rotating cursor over locality slots, shared across workers
    numa_next: usize,
}

/// Handle to a store directory.
pub struct Db {
    dir: PathBuf,
}

impl Db {
    /// Open (creating if needed) the store at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Take the exclusive lock over all tables, blocking until granted.
    /// The guard owns its handle and may outlive the `Db` borrow.
    pub fn lock(&self) -> Result<DbGuard, StoreError> {
        let lock_file = File::options()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.dir.join("lock"))?;
        lock_file.lock_exclusive()?;
        Ok(DbGuard { dir: self.dir.clone(), lock_file })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Exclusive access to every table, scoped to one merge-apply-push cycle.
pub struct DbGuard {
    dir: PathBuf,
    lock_file: File,
}

impl Drop for DbGuard {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.lock_file);
    }
}

impl DbGuard {
    fn path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{table}.json"))
    }

    fn read<T: DeserializeOwned + Default>(&self, table: &str) -> Result<T, StoreError> {
        let path = self.path(table);
        if !path.exists() {
            return Ok(T::default());
        }
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    fn write<T: Serialize>(&self, table: &str, value: &T) -> Result<(), StoreError> {
        let path = self.path(table);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn counters(&self) -> Result<Counters, StoreError> {
        self.read("counters")
    }

    // ── Serial & placement cursor ───────────────────────────────────────

    /// The store's current serial.
    pub fn serial(&self) -> Result<u64, StoreError> {
        Ok(self.counters()?.serial)
    }

    /// Increment and persist the serial; returns the new value.
    pub fn bump_serial(&mut self) -> Result<u64, StoreError> {
        let mut counters = self.counters()?;
        counters.serial += 1;
        self.write("counters", &counters)?;
        Ok(counters.serial)
    }

    /// Shared rotating cursor over locality slots.
    pub fn numa_next(&self) -> Result<usize, StoreError> {
        Ok(self.counters()?.numa_next)
    }

    pub fn set_numa_next(&mut self, next: usize) -> Result<(), StoreError> {
        let mut counters = self.counters()?;
        counters.numa_next = next;
        self.write("counters", &counters)
    }

    // ── Builds ──────────────────────────────────────────────────────────

    pub fn builds(&self) -> Result<BTreeMap<BuildId, BuildRecord>, StoreError> {
        self.read("builds")
    }

    pub fn get_build(&self, id: &BuildId) -> Result<Option<BuildRecord>, StoreError> {
        Ok(self.builds()?.remove(id))
    }

    pub fn put_build(&mut self, build: BuildRecord) -> Result<(), StoreError> {
        let mut builds = self.builds()?;
        builds.insert(build.id.clone(), build);
        self.write("builds", &builds)
    }

    // ── Workers ─────────────────────────────────────────────────────────

    pub fn workers(&self) -> Result<BTreeMap<WorkerId, WorkerRecord>, StoreError> {
        self.read("workers")
    }

    pub fn put_worker(&mut self, worker: WorkerRecord) -> Result<(), StoreError> {
        let mut workers = self.workers()?;
        workers.insert(worker.id.clone(), worker);
        self.write("workers", &workers)
    }

    // ── Progress log ────────────────────────────────────────────────────

    fn progress(&self) -> Result<Vec<ProgressMessage>, StoreError> {
        self.read("progress")
    }

    /// Messages of `build_id` with serial greater than `after`, in order.
    pub fn progress_after(
        &self,
        after: u64,
        build_id: &BuildId,
    ) -> Result<Vec<ProgressMessage>, StoreError> {
        Ok(self
            .progress()?
            .into_iter()
            .filter(|m| m.serial > after && m.build_id == *build_id)
            .collect())
    }

    /// Append a message under a freshly incremented serial; returns it.
    pub fn append_progress(
        &mut self,
        kind: MessageKind,
        text: impl Into<String>,
        verbose: bool,
        build_id: &BuildId,
    ) -> Result<u64, StoreError> {
        let serial = self.bump_serial()?;
        let mut log = self.progress()?;
        log.push(ProgressMessage {
            serial,
            kind,
            text: text.into(),
            verbose,
            build_id: build_id.clone(),
        });
        self.write("progress", &log)?;
        Ok(serial)
    }

    // ── Sessions ────────────────────────────────────────────────────────

    pub fn sessions(&self) -> Result<BTreeMap<SessionName, SessionMeta>, StoreError> {
        self.read("sessions")
    }

    /// Insert session rows, keeping existing rows untouched (append-only).
    pub fn upsert_sessions<I>(&mut self, rows: I) -> Result<(), StoreError>
    where
        I: IntoIterator<Item = SessionMeta>,
    {
        let mut sessions = self.sessions()?;
        for row in rows {
            sessions.entry(row.name.clone()).or_insert(row);
        }
        self.write("sessions", &sessions)
    }

    /// Replace the whole sessions table. Used when a new build takes over
    /// the store; rows of the previous build's graph are dropped.
    pub fn replace_sessions(
        &mut self,
        rows: &BTreeMap<SessionName, SessionMeta>,
    ) -> Result<(), StoreError> {
        self.write("sessions", rows)
    }

    // ── Pending & running (fully re-read, fully re-written) ─────────────

    pub fn pending(&self) -> Result<BTreeMap<SessionName, PendingTask>, StoreError> {
        self.read("pending")
    }

    pub fn replace_pending(
        &mut self,
        rows: &BTreeMap<SessionName, PendingTask>,
    ) -> Result<(), StoreError> {
        self.write("pending", rows)
    }

    /// Apply a push diff to the pending table: delete removed rows, insert
    /// added ones.
    pub fn update_pending(
        &mut self,
        remove: &[SessionName],
        insert: &[PendingTask],
    ) -> Result<(), StoreError> {
        let mut rows = self.pending()?;
        for name in remove {
            rows.remove(name);
        }
        for task in insert {
            rows.insert(task.name.clone(), task.clone());
        }
        self.write("pending", &rows)
    }

    pub fn running(&self) -> Result<BTreeMap<SessionName, RunningJob>, StoreError> {
        self.read("running")
    }

    pub fn replace_running(
        &mut self,
        rows: &BTreeMap<SessionName, RunningJob>,
    ) -> Result<(), StoreError> {
        self.write("running", rows)
    }

    /// Apply a push diff to the running table.
    pub fn update_running(
        &mut self,
        remove: &[SessionName],
        insert: &[RunningJob],
    ) -> Result<(), StoreError> {
        let mut rows = self.running()?;
        for name in remove {
            rows.remove(name);
        }
        for job in insert {
            rows.insert(job.name.clone(), job.clone());
        }
        self.write("running", &rows)
    }

    // ── Results ─────────────────────────────────────────────────────────

    fn all_results(&self) -> Result<Vec<SessionResult>, StoreError> {
        self.read("results")
    }

    /// Results of one build, keyed by session name.
    pub fn results_for(
        &self,
        build_id: &BuildId,
    ) -> Result<BTreeMap<SessionName, SessionResult>, StoreError> {
        Ok(self
            .all_results()?
            .into_iter()
            .filter(|r| r.build_id == *build_id)
            .map(|r| (r.name.clone(), r))
            .collect())
    }

    /// Record a result. Write-once: a second insert for the same
    /// (session, build) is an error.
    pub fn insert_result(&mut self, row: SessionResult) -> Result<(), StoreError> {
        let mut results = self.all_results()?;
        if results.iter().any(|r| r.name == row.name && r.build_id == row.build_id) {
            return Err(StoreError::DuplicateResult { name: row.name, build_id: row.build_id });
        }
        results.push(row);
        self.write("results", &results)
    }

    /// The most recent prior result for `name`, excluding `current_build`.
    ///
    /// "Most recent" orders by the recording build's start timestamp, so the
    /// cache compares against what the last build actually produced.
    pub fn previous_result(
        &self,
        name: &SessionName,
        current_build: &BuildId,
    ) -> Result<Option<SessionResult>, StoreError> {
        let builds = self.builds()?;
        let started = |id: &BuildId| builds.get(id).map(|b| b.started_at).unwrap_or(0);
        Ok(self
            .all_results()?
            .into_iter()
            .filter(|r| r.name == *name && r.build_id != *current_build)
            .max_by_key(|r| started(&r.build_id)))
    }

    // ── Cleanup & monitoring ────────────────────────────────────────────

    /// Remove every row belonging to builds marked progress-stopped.
    /// Rows of finished builds are retained. Returns the builds removed.
    pub fn clean(&mut self) -> Result<Vec<BuildId>, StoreError> {
        let builds = self.builds()?;
        let stopped: Vec<BuildId> = builds
            .values()
            .filter(|b| b.progress_stopped)
            .map(|b| b.id.clone())
            .collect();
        if stopped.is_empty() {
            return Ok(stopped);
        }
        let dead = |id: &BuildId| stopped.contains(id);

        let kept: BTreeMap<BuildId, BuildRecord> =
            builds.into_iter().filter(|(id, _)| !dead(id)).collect();
        self.write("builds", &kept)?;

        let workers: BTreeMap<WorkerId, WorkerRecord> =
            self.workers()?.into_iter().filter(|(_, w)| !dead(&w.build_id)).collect();
        self.write("workers", &workers)?;

        let progress: Vec<ProgressMessage> =
            self.progress()?.into_iter().filter(|m| !dead(&m.build_id)).collect();
        self.write("progress", &progress)?;

        let sessions: BTreeMap<SessionName, SessionMeta> =
            self.sessions()?.into_iter().filter(|(_, s)| !dead(&s.build_id)).collect();
        self.write("sessions", &sessions)?;

        let pending: BTreeMap<SessionName, PendingTask> =
            self.pending()?.into_iter().filter(|(_, t)| !dead(&t.build_id)).collect();
        self.write("pending", &pending)?;

        let running: BTreeMap<SessionName, RunningJob> =
            self.running()?.into_iter().filter(|(_, j)| !dead(&j.build_id)).collect();
        self.write("running", &running)?;

        let results: Vec<SessionResult> =
            self.all_results()?.into_iter().filter(|r| !dead(&r.build_id)).collect();
        self.write("results", &results)?;

        tracing::info!(builds = stopped.len(), "cleaned stopped builds");
        Ok(stopped)
    }

    /// Read-only snapshot of the full store for monitoring.
    pub fn snapshot(&self) -> Result<StoreSnapshot, StoreError> {
        Ok(StoreSnapshot {
            serial: self.serial()?,
            builds: self.builds()?,
            workers: self.workers()?,
            progress: self.progress()?,
            sessions: self.sessions()?,
            pending: self.pending()?,
            running: self.running()?,
            results: self.all_results()?,
        })
    }
}

#[cfg(test)]
#[path = "db_tests.rs"]
mod tests;
