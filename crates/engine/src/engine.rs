// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The worker build loop.
//!
//! Each cycle: poll locally running jobs, replay shared progress, then one
//! locked merge-apply-push pass against the store — finalize whatever
//! finished, start whatever the scheduler picks, publish the changes, stamp
//! the heartbeat. Sleeps only when a cycle neither started nor finished
//! anything.

use crate::cache::{self, StartDecision};
use crate::config::BuildConfig;
use crate::progress::{Echo, LogSink, ProgressSink};
use crate::runner::{JobHandle, JobRunner, JobSpec, RunOutcome, RunnerError};
use crate::scheduler;
use crate::state::BuildState;
use crate::sync::{diff, merge, Merge};
use kiln_core::{
    BuildId, BuildRecord, Clock, ContentHash, MessageKind, PendingTask, ProgressMessage,
    RunningJob, SessionName, SessionResult, SessionStatus, SystemClock, WorkerId, WorkerRecord,
};
use kiln_graph::SessionGraph;
use kiln_store::{Db, DbGuard, StoreError, StoreSnapshot};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors from the engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("runner error: {0}")]
    Runner(#[from] RunnerError),
    #[error("artifact error: {0}")]
    Io(#[from] std::io::Error),
    /// Local serial ahead of the store: a protocol invariant is broken.
    #[error("serial regression: local serial {local} ahead of store serial {store}")]
    SerialRegression { local: u64, store: u64 },
}

/// One worker's engine. `run` drives the build to completion.
pub struct Engine<R: JobRunner, C: Clock = SystemClock> {
    config: BuildConfig,
    graph: SessionGraph,
    db: Db,
    runner: R,
    clock: C,
    sink: Box<dyn ProgressSink>,
    stop: CancellationToken,

    build_id: BuildId,
    worker_id: WorkerId,
    worker_row: WorkerRecord,
    state: BuildState,

    // Last-known store snapshots, for push diffing
    known_pending: BTreeMap<SessionName, PendingTask>,
    known_running: BTreeMap<SessionName, RunningJob>,
    known_numa: usize,
    /// Result rows the store already holds for this build
    store_results: BTreeSet<SessionName>,

    // Local-only execution bookkeeping
    handles: BTreeMap<SessionName, R::Handle>,
    started: BTreeMap<SessionName, Instant>,
    inflight_inputs: BTreeMap<SessionName, ContentHash>,
    timed_out: BTreeSet<SessionName>,
    cancelled: BTreeSet<SessionName>,

    echo: Echo,
    stop_published: bool,
}

impl<R: JobRunner> Engine<R, SystemClock> {
    /// Engine with the system clock and the default log sink.
    pub fn new(
        config: BuildConfig,
        graph: SessionGraph,
        runner: R,
        build_id: BuildId,
    ) -> Result<Self, EngineError> {
        let sink = Box::new(LogSink { verbose: config.verbose });
        Self::with_parts(config, graph, runner, build_id, SystemClock, sink)
    }
}

impl<R: JobRunner, C: Clock> Engine<R, C> {
    /// Engine with explicit clock and sink, for tests and embedding.
    pub fn with_parts(
        config: BuildConfig,
        graph: SessionGraph,
        runner: R,
        build_id: BuildId,
        clock: C,
        sink: Box<dyn ProgressSink>,
    ) -> Result<Self, EngineError> {
        let db = Db::open(&config.store_dir)?;
        let worker_id = WorkerId::new();
        let now = clock.epoch_ms();
        let worker_row = WorkerRecord {
            id: worker_id.clone(),
            build_id: build_id.clone(),
            host: config.host.clone(),
            pid: std::process::id(),
            process_started_at: now,
            registered_at: now,
            heartbeat_at: now,
            stopped_at: None,
            last_serial: 0,
        };
        Ok(Self {
            config,
            graph,
            db,
            runner,
            clock,
            sink,
            stop: CancellationToken::new(),
            build_id,
            worker_id,
            worker_row,
            state: BuildState::default(),
            known_pending: BTreeMap::new(),
            known_running: BTreeMap::new(),
            known_numa: 0,
            store_results: BTreeSet::new(),
            handles: BTreeMap::new(),
            started: BTreeMap::new(),
            inflight_inputs: BTreeMap::new(),
            timed_out: BTreeSet::new(),
            cancelled: BTreeSet::new(),
            echo: Echo::default(),
            stop_published: false,
        })
    }

    /// Token that halts new job starts and cancels running jobs when
    /// triggered. Also trips when another worker stops the build.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// The build this engine ended up part of (adopted when joining).
    pub fn build_id(&self) -> &BuildId {
        &self.build_id
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    /// Run the build to completion. Returns every session's final result.
    pub async fn run(mut self) -> Result<BTreeMap<SessionName, SessionResult>, EngineError> {
        self.startup()?;
        loop {
            let progressed = self.cycle().await?;
            if self.state.is_done() {
                break;
            }
            if !progressed {
                tokio::time::sleep(Duration::from_millis(self.config.idle_sleep_ms)).await;
            }
        }
        self.shutdown()?;
        Ok(self.state.results.clone())
    }

    // ── Startup / shutdown ──────────────────────────────────────────────

    /// Create or join the build, install the graph, register the worker.
    fn startup(&mut self) -> Result<(), EngineError> {
        std::fs::create_dir_all(&self.config.artifacts_dir)?;
        let now = self.clock.epoch_ms();
        let mut guard = self.db.lock()?;

        let active = guard
            .builds()?
            .into_values()
            .filter(|b| b.is_active() && !b.progress_stopped)
            .max_by_key(|b| b.started_at);

        match active {
            Some(build) => {
                // Join the running build instead of starting our own, and
                // replay the progress history we missed.
                tracing::info!(build = %build.id, worker = %self.worker_id, "joining active build");
                self.build_id = build.id;
                self.worker_row.build_id = self.build_id.clone();
                let unseen = guard.progress_after(self.echo.watermark, &self.build_id)?;
                self.echo.replay(&unseen, self.sink.as_ref());
            }
            None => {
                tracing::info!(build = %self.build_id, worker = %self.worker_id, "starting build");
                guard.put_build(BuildRecord::new(
                    self.build_id.clone(),
                    self.config.platform.clone(),
                    self.config.options.clone(),
                    now,
                ))?;

                let sessions: BTreeMap<SessionName, _> = self
                    .graph
                    .sessions()
                    .cloned()
                    .map(|meta| (meta.name.clone(), meta))
                    .collect();
                let pending: BTreeMap<SessionName, PendingTask> = self
                    .graph
                    .sessions()
                    .map(|meta| {
                        let task = PendingTask::new(
                            meta.name.clone(),
                            meta.deps.clone(),
                            self.build_id.clone(),
                        );
                        (meta.name.clone(), task)
                    })
                    .collect();
                guard.replace_sessions(&sessions)?;
                guard.replace_pending(&pending)?;
                guard.replace_running(&BTreeMap::new())?;
                guard.bump_serial()?;
            }
        }

        self.worker_row.last_serial = guard.serial()?;
        self.worker_row.heartbeat_at = now;
        guard.put_worker(self.worker_row.clone())?;
        announce(
            &mut guard,
            &mut self.echo,
            self.sink.as_ref(),
            &self.build_id,
            MessageKind::Status,
            format!("worker {} joined on {}", self.worker_id, self.config.host),
            true,
        )?;
        Ok(())
    }

    /// Stamp the worker stopped; close the build when it is complete and
    /// this was the last active worker.
    fn shutdown(&mut self) -> Result<(), EngineError> {
        let now = self.clock.epoch_ms();
        let mut guard = self.db.lock()?;

        self.worker_row.stopped_at = Some(now);
        self.worker_row.heartbeat_at = now;
        guard.put_worker(self.worker_row.clone())?;

        let others_active = guard
            .workers()?
            .values()
            .any(|w| w.build_id == self.build_id && w.stopped_at.is_none() && w.id != self.worker_id);
        if !others_active && self.state.is_done() {
            if let Some(mut build) = guard.get_build(&self.build_id)? {
                if build.stopped_at.is_none() {
                    build.stopped_at = Some(now);
                    guard.put_build(build)?;
                    announce(
                        &mut guard,
                        &mut self.echo,
                        self.sink.as_ref(),
                        &self.build_id,
                        MessageKind::Status,
                        "build finished".to_string(),
                        false,
                    )?;
                }
            }
        }

        let serial = guard.bump_serial()?;
        self.state.adopt_serial(serial);
        self.worker_row.last_serial = serial;
        guard.put_worker(self.worker_row.clone())?;
        Ok(())
    }

    // ── One scheduling cycle ────────────────────────────────────────────

    /// Returns true when the cycle finished or started at least one session.
    async fn cycle(&mut self) -> Result<bool, EngineError> {
        // Poll local jobs and enforce timeouts, without the lock.
        let outcomes = self.poll_local_jobs();

        // Cancellation requested: stop every local job once.
        if self.stop.is_cancelled() {
            for (name, handle) in self.handles.iter_mut() {
                if self.cancelled.insert(name.clone()) {
                    handle.cancel();
                }
            }
        }

        // Replay shared progress, then enter the locked protocol with an
        // up-to-date view; retry if messages raced in between.
        let mut guard = loop {
            self.sync_progress()?;
            let guard = self.db.lock()?;
            let unseen = guard.progress_after(self.echo.watermark, &self.build_id)?;
            if unseen.is_empty() {
                break guard;
            }
            drop(guard);
        };

        // Another worker may have stopped the build.
        if let Some(build) = guard.get_build(&self.build_id)? {
            if build.progress_stopped {
                self.stop.cancel();
            }
        }

        self.pull(&mut guard)?;
        let progressed = self.apply(&mut guard, outcomes).await?;
        self.push(&mut guard)?;
        Ok(progressed)
    }

    /// Non-blocking poll of every locally running job.
    fn poll_local_jobs(&mut self) -> Vec<(SessionName, RunOutcome)> {
        let now = self.clock.now();
        for (name, started) in &self.started {
            if self.cancelled.contains(name) || self.timed_out.contains(name) {
                continue;
            }
            let timeout_ms = self
                .state
                .sessions
                .get(name)
                .map(|meta| self.config.scaled_timeout_ms(meta.timeout_ms))
                .unwrap_or(0);
            if timeout_ms > 0 && now.duration_since(*started) >= Duration::from_millis(timeout_ms) {
                if let Some(handle) = self.handles.get_mut(name) {
                    tracing::warn!(session = %name, timeout_ms, "session timed out");
                    self.timed_out.insert(name.clone());
                    handle.cancel();
                }
            }
        }

        let mut finished = Vec::new();
        let names: Vec<SessionName> = self.handles.keys().cloned().collect();
        for name in names {
            if let Some(handle) = self.handles.get_mut(&name) {
                if let Some(outcome) = handle.try_join() {
                    self.handles.remove(&name);
                    self.started.remove(&name);
                    finished.push((name, outcome));
                }
            }
        }
        finished
    }

    /// Drain unseen progress messages under a short lock of their own.
    fn sync_progress(&mut self) -> Result<(), EngineError> {
        let guard = self.db.lock()?;
        let unseen = guard.progress_after(self.echo.watermark, &self.build_id)?;
        drop(guard);
        self.echo.replay(&unseen, self.sink.as_ref());
        Ok(())
    }

    /// Protocol step 1–2: read the store serial, pull changed domains.
    fn pull(&mut self, guard: &mut DbGuard) -> Result<(), EngineError> {
        let store_serial = guard.serial()?;
        if self.state.serial > store_serial {
            return Err(EngineError::SerialRegression {
                local: self.state.serial,
                store: store_serial,
            });
        }
        if self.state.serial == store_serial {
            return Ok(());
        }

        merge(Merge::AppendOnly, &mut self.state.sessions, guard.sessions()?);

        let remote_results = guard.results_for(&self.build_id)?;
        self.store_results.extend(remote_results.keys().cloned());
        merge(Merge::AppendOnly, &mut self.state.results, remote_results);

        merge(Merge::Replace, &mut self.state.pending, guard.pending()?);
        merge(Merge::Replace, &mut self.state.running, guard.running()?);
        self.state.numa_next = guard.numa_next()?;

        // Recorded results resolve queue entries; idempotent after merge.
        let resolved: Vec<SessionName> = self.state.results.keys().cloned().collect();
        for name in &resolved {
            self.state.resolve(name);
        }

        self.state.adopt_serial(store_serial);
        self.known_pending = self.state.pending.clone();
        self.known_running = self.state.running.clone();
        self.known_numa = self.state.numa_next;
        Ok(())
    }

    /// Protocol step 3: the state mutation — finalize finished jobs, then
    /// start sessions while the scheduler has picks.
    async fn apply(
        &mut self,
        guard: &mut DbGuard,
        outcomes: Vec<(SessionName, RunOutcome)>,
    ) -> Result<bool, EngineError> {
        let mut progressed = false;

        for (name, outcome) in outcomes {
            self.finalize_job(guard, name, outcome)?;
            progressed = true;
        }

        let stopped = self.stop.is_cancelled();
        if stopped {
            // Drain the queue: everything still pending ends up cancelled,
            // cascading as results resolve the remaining tasks.
            loop {
                let ready: Vec<SessionName> =
                    self.state.ready().map(|task| task.name.clone()).collect();
                if ready.is_empty() {
                    break;
                }
                for name in ready {
                    let input = self
                        .state
                        .sessions
                        .get(&name)
                        .map(|meta| cache::input_hash(meta, &self.state.results))
                        .unwrap_or_else(ContentHash::bootstrap);
                    self.finalize_unexecuted(
                        guard,
                        &name,
                        SessionStatus::Cancelled,
                        None,
                        vec![],
                        input,
                        ContentHash::of_str(""),
                        false,
                    )?;
                    progressed = true;
                }
            }
            return Ok(progressed);
        }

        while let Some(name) =
            scheduler::next_ready(&self.state, &self.graph, self.config.max_jobs, false)
        {
            if !self.start_session(guard, name).await? {
                break;
            }
            progressed = true;
        }
        Ok(progressed)
    }

    /// Start one ready session: cache hit, refusal, or a spawned job.
    /// Returns false when the session could not be acted on yet.
    async fn start_session(
        &mut self,
        guard: &mut DbGuard,
        name: SessionName,
    ) -> Result<bool, EngineError> {
        let Some(meta) = self.state.sessions.get(&name).cloned() else {
            // Row not pulled yet; the next cycle will see it.
            return Ok(false);
        };
        let previous = guard.previous_result(&name, &self.build_id)?;
        let decision = cache::start_decision(
            &meta,
            &self.state,
            previous.as_ref(),
            &self.config.artifacts_dir,
            self.config.fresh,
            self.config.no_build,
            self.stop.is_cancelled(),
        );

        match decision {
            StartDecision::CacheHit { input_hash, output_hash } => {
                self.finalize_unexecuted(
                    guard,
                    &name,
                    SessionStatus::Ok,
                    Some(0),
                    vec![],
                    input_hash,
                    output_hash,
                    true,
                )?;
            }
            StartDecision::NoBuild { input_hash } => {
                self.finalize_unexecuted(
                    guard,
                    &name,
                    SessionStatus::Failed,
                    None,
                    vec!["skipped: no-build mode".to_string()],
                    input_hash,
                    ContentHash::of_str(""),
                    false,
                )?;
            }
            StartDecision::Undefined { input_hash } => {
                self.finalize_unexecuted(
                    guard,
                    &name,
                    SessionStatus::Cancelled,
                    None,
                    vec![],
                    input_hash,
                    ContentHash::of_str(""),
                    false,
                )?;
            }
            StartDecision::Run { input_hash } => {
                let placement = scheduler::allocate_placement(
                    &mut self.state,
                    &self.config.numa_nodes,
                    &self.config.host,
                );
                cache::reset_artifact(&self.config.artifacts_dir, &name)?;
                let artifact = meta
                    .keep_artifact
                    .then(|| cache::artifact_path(&self.config.artifacts_dir, &name));

                let spec = JobSpec {
                    name: name.clone(),
                    input_hash: input_hash.clone(),
                    placement: placement.clone(),
                    artifact,
                };
                let handle = self.runner.spawn(spec).await?;

                self.handles.insert(name.clone(), handle);
                self.started.insert(name.clone(), self.clock.now());
                self.inflight_inputs.insert(name.clone(), input_hash);
                self.state.remove_pending(&name);
                self.state.add_running(RunningJob {
                    name: name.clone(),
                    worker: self.worker_id.clone(),
                    build_id: self.build_id.clone(),
                    placement,
                    started_at: self.clock.epoch_ms(),
                });
                announce(
                    guard,
                    &mut self.echo,
                    self.sink.as_ref(),
                    &self.build_id,
                    MessageKind::Status,
                    format!("building {name} ..."),
                    false,
                )?;
            }
        }
        Ok(true)
    }

    /// Record the result of a job this worker ran.
    fn finalize_job(
        &mut self,
        guard: &mut DbGuard,
        name: SessionName,
        outcome: RunOutcome,
    ) -> Result<(), EngineError> {
        let job = self.state.remove_running(&name);
        self.state.remove_pending(&name);

        let mut output = outcome.output;
        let status = if self.cancelled.remove(&name) {
            SessionStatus::Cancelled
        } else if self.timed_out.remove(&name) {
            output.push("timed out".to_string());
            SessionStatus::Failed
        } else {
            SessionStatus::from_exit_code(outcome.exit_code)
        };

        let meta = self.state.sessions.get(&name);
        let input_hash = self
            .inflight_inputs
            .remove(&name)
            .unwrap_or_else(ContentHash::bootstrap);
        let placement = job
            .map(|j| j.placement)
            .unwrap_or_else(|| kiln_core::Placement::unbound(self.config.host.clone()));

        let result = SessionResult {
            name: name.clone(),
            worker: self.worker_id.clone(),
            build_id: self.build_id.clone(),
            placement,
            status,
            exit_code: Some(outcome.exit_code),
            output,
            timing: outcome.timing,
            options_hash: meta.map(|m| m.options_hash.clone()).unwrap_or_else(|| ContentHash::of_str("")),
            sources_hash: meta.map(|m| m.sources_hash.clone()).unwrap_or_else(|| ContentHash::of_str("")),
            input_hash,
            output_hash: outcome.output_hash,
            current: false,
        };
        self.state.record_result(result);

        announce(
            guard,
            &mut self.echo,
            self.sink.as_ref(),
            &self.build_id,
            if status.is_ok() { MessageKind::Status } else { MessageKind::Error },
            format!("finished {name} ({status})"),
            false,
        )?;
        Ok(())
    }

    /// Record a result for a session that never ran: cache hit, no-build
    /// refusal, or cancellation.
    #[allow(clippy::too_many_arguments)]
    fn finalize_unexecuted(
        &mut self,
        guard: &mut DbGuard,
        name: &SessionName,
        status: SessionStatus,
        exit_code: Option<i32>,
        output: Vec<String>,
        input_hash: ContentHash,
        output_hash: ContentHash,
        current: bool,
    ) -> Result<(), EngineError> {
        self.state.remove_pending(name);
        let meta = self.state.sessions.get(name);
        let result = SessionResult {
            name: name.clone(),
            worker: self.worker_id.clone(),
            build_id: self.build_id.clone(),
            placement: kiln_core::Placement::unbound(self.config.host.clone()),
            status,
            exit_code,
            output,
            timing: Default::default(),
            options_hash: meta.map(|m| m.options_hash.clone()).unwrap_or_else(|| ContentHash::of_str("")),
            sources_hash: meta.map(|m| m.sources_hash.clone()).unwrap_or_else(|| ContentHash::of_str("")),
            input_hash,
            output_hash,
            current,
        };
        self.state.record_result(result);

        let note = match (status, current) {
            (SessionStatus::Ok, true) => format!("finished {name} (cached)"),
            (SessionStatus::Cancelled, _) => format!("cancelled {name}"),
            _ => format!("finished {name} ({status})"),
        };
        announce(
            guard,
            &mut self.echo,
            self.sink.as_ref(),
            &self.build_id,
            MessageKind::Status,
            note,
            false,
        )?;
        Ok(())
    }

    /// Protocol step 4: push local changes, bump the serial when anything
    /// changed, stamp the heartbeat either way.
    fn push(&mut self, guard: &mut DbGuard) -> Result<(), EngineError> {
        let mut changed = false;

        let pending_diff = diff(&self.known_pending, &self.state.pending);
        if !pending_diff.is_empty() {
            guard.update_pending(&pending_diff.remove, &pending_diff.insert)?;
            self.known_pending = self.state.pending.clone();
            changed = true;
        }

        let running_diff = diff(&self.known_running, &self.state.running);
        if !running_diff.is_empty() {
            guard.update_running(&running_diff.remove, &running_diff.insert)?;
            self.known_running = self.state.running.clone();
            changed = true;
        }

        for (name, result) in &self.state.results {
            if self.store_results.insert(name.clone()) {
                guard.insert_result(result.clone())?;
                changed = true;
            }
        }

        if self.state.numa_next != self.known_numa {
            guard.set_numa_next(self.state.numa_next)?;
            self.known_numa = self.state.numa_next;
            changed = true;
        }

        if self.stop.is_cancelled() && !self.stop_published {
            if let Some(mut build) = guard.get_build(&self.build_id)? {
                if !build.progress_stopped {
                    build.progress_stopped = true;
                    guard.put_build(build)?;
                    changed = true;
                }
            }
            self.stop_published = true;
        }

        if changed {
            let serial = guard.bump_serial()?;
            self.state.adopt_serial(serial);
        } else {
            self.state.adopt_serial(guard.serial()?);
        }

        self.worker_row.heartbeat_at = self.clock.epoch_ms();
        self.worker_row.last_serial = self.state.serial;
        guard.put_worker(self.worker_row.clone())?;
        Ok(())
    }
}

/// Helper: append a message to the shared log, emit it locally, and mark it
/// as our own so the next drain does not echo it back.
fn announce(
    guard: &mut DbGuard,
    echo: &mut Echo,
    sink: &dyn ProgressSink,
    build_id: &BuildId,
    kind: MessageKind,
    text: String,
    verbose: bool,
) -> Result<(), EngineError> {
    let serial = guard.append_progress(kind, text.clone(), verbose, build_id)?;
    echo.wrote(serial);
    sink.emit(&ProgressMessage { serial, kind, text, verbose, build_id: build_id.clone() });
    Ok(())
}

/// Read-only snapshot of a store, for status output and monitoring.
pub fn snapshot(store_dir: &Path) -> Result<StoreSnapshot, EngineError> {
    let db = Db::open(store_dir)?;
    let guard = db.lock()?;
    Ok(guard.snapshot()?)
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
