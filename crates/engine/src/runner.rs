// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The external job runner.
//!
//! The engine never blocks on a job: it spawns through [`JobRunner`], keeps
//! the [`JobHandle`] local to this process, and polls it from the main loop.
//! Cancellation is a request; the outcome still arrives through the handle.

use async_trait::async_trait;
use kiln_core::{ContentHash, Placement, SessionName, Timing};
use std::path::PathBuf;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Errors from spawning jobs
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to spawn job for session {name}: {source}")]
    Spawn {
        name: SessionName,
        #[source]
        source: std::io::Error,
    },
}

/// Everything a job needs to run: the session, the input hash it builds
/// against, and where it was placed.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub name: SessionName,
    pub input_hash: ContentHash,
    pub placement: Placement,
    /// Artifact file the job should produce, for sessions that keep one
    pub artifact: Option<PathBuf>,
}

/// What a finished job reports back.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub exit_code: i32,
    pub output: Vec<String>,
    pub timing: Timing,
    pub output_hash: ContentHash,
}

/// Spawns external compile jobs.
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    type Handle: JobHandle;

    async fn spawn(&self, spec: JobSpec) -> Result<Self::Handle, RunnerError>;
}

/// Live handle to one spawned job, owned by the worker that spawned it.
pub trait JobHandle: Send {
    /// Non-blocking join: the outcome once the job has finished.
    fn try_join(&mut self) -> Option<RunOutcome>;

    /// Request cancellation. The outcome still arrives via [`try_join`].
    ///
    /// [`try_join`]: JobHandle::try_join
    fn cancel(&mut self);
}

// ── Process-backed runner ───────────────────────────────────────────────

/// Runs jobs as external processes.
///
/// The session, input hash, placement, and artifact path travel in the
/// environment (`KILN_SESSION`, `KILN_INPUT_HASH`, `KILN_NODE`,
/// `KILN_ARTIFACT`); the command itself is fixed per runner.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    pub program: String,
    pub args: Vec<String>,
}

impl ProcessRunner {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }
}

#[async_trait]
impl JobRunner for ProcessRunner {
    type Handle = ProcessHandle;

    async fn spawn(&self, spec: JobSpec) -> Result<ProcessHandle, RunnerError> {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .env("KILN_SESSION", spec.name.as_str())
            .env("KILN_INPUT_HASH", spec.input_hash.as_str())
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if let Some(node) = spec.placement.node {
            cmd.env("KILN_NODE", node.to_string());
        }
        if let Some(artifact) = &spec.artifact {
            cmd.env("KILN_ARTIFACT", artifact);
        }

        let started = std::time::Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|source| RunnerError::Spawn { name: spec.name.clone(), source })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let artifact = spec.artifact.clone();
        let name = spec.name.clone();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            // Child::wait is cancel-safe, so waiting in short slices keeps
            // the cancellation check responsive without losing the status.
            let wait = async {
                let slice = std::time::Duration::from_millis(50);
                loop {
                    if cancelled.is_cancelled() {
                        let _ = child.start_kill();
                        break child.wait().await;
                    }
                    match tokio::time::timeout(slice, child.wait()).await {
                        Ok(status) => break status,
                        Err(_) => continue,
                    }
                }
            };
            let (status, out_lines, err_lines) = tokio::join!(wait, read_lines(stdout), read_lines(stderr));

            let exit_code = match status {
                Ok(status) => status.code().unwrap_or(-1),
                Err(_) => -1,
            };
            let mut output = out_lines;
            output.extend(err_lines);

            let mut timing = parse_timing(&output);
            timing.elapsed_ms = started.elapsed().as_millis() as u64;

            let output_hash = artifact
                .as_deref()
                .and_then(|path| std::fs::read(path).ok())
                .map(|bytes| ContentHash::of_bytes(&bytes))
                .unwrap_or_else(|| ContentHash::of_str(&output.join("\n")));

            tracing::debug!(session = %name, exit_code, "job exited");
            let _ = tx.send(RunOutcome { exit_code, output, timing, output_hash });
        });

        Ok(ProcessHandle { rx, token })
    }
}

/// Handle to a spawned process.
pub struct ProcessHandle {
    rx: oneshot::Receiver<RunOutcome>,
    token: CancellationToken,
}

impl JobHandle for ProcessHandle {
    fn try_join(&mut self) -> Option<RunOutcome> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            // The pump task died; report a dead job rather than hanging.
            Err(oneshot::error::TryRecvError::Closed) => Some(RunOutcome {
                exit_code: -1,
                output: vec!["job runner task terminated".to_string()],
                timing: Timing::default(),
                output_hash: ContentHash::of_str(""),
            }),
        }
    }

    fn cancel(&mut self) {
        self.token.cancel();
    }
}

async fn read_lines(pipe: Option<impl tokio::io::AsyncRead + Unpin>) -> Vec<String> {
    let Some(pipe) = pipe else { return Vec::new() };
    let mut lines = Vec::new();
    let mut reader = BufReader::new(pipe).lines();
    while let Ok(Some(line)) = reader.next_line().await {
        lines.push(line);
    }
    lines
}

/// Jobs may report their own timing as a `kiln: timing cpu_ms=N gc_ms=N`
/// output line; anything absent stays zero.
fn parse_timing(output: &[String]) -> Timing {
    let mut timing = Timing::default();
    for line in output {
        let Some(rest) = line.strip_prefix("kiln: timing ") else { continue };
        for field in rest.split_whitespace() {
            match field.split_once('=') {
                Some(("cpu_ms", value)) => timing.cpu_ms = value.parse().unwrap_or(0),
                Some(("gc_ms", value)) => timing.gc_ms = value.parse().unwrap_or(0),
                _ => {}
            }
        }
    }
    timing
}

// ── Scripted runner for tests ───────────────────────────────────────────

#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeRunner, ScriptedJob};

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::{JobHandle, JobRunner, JobSpec, RunOutcome, RunnerError};
    use async_trait::async_trait;
    use kiln_core::{ContentHash, SessionName, Timing};
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    /// Scripted behavior for one session's job.
    #[derive(Debug, Clone)]
    pub struct ScriptedJob {
        pub exit_code: i32,
        pub output: Vec<String>,
        pub timing: Timing,
        /// Overrides the derived output hash when set
        pub output_hash: Option<ContentHash>,
        /// try_join returns None this many times before the outcome
        pub polls: u32,
    }

    impl Default for ScriptedJob {
        fn default() -> Self {
            Self {
                exit_code: 0,
                output: Vec::new(),
                timing: Timing::default(),
                output_hash: None,
                polls: 0,
            }
        }
    }

    impl ScriptedJob {
        pub fn failing(exit_code: i32) -> Self {
            Self { exit_code, ..Self::default() }
        }

        /// A job that stays running until cancelled.
        pub fn hanging() -> Self {
            Self { polls: u32::MAX, ..Self::default() }
        }
    }

    /// In-memory job runner driven by per-session scripts.
    ///
    /// Unscripted sessions succeed immediately with an output hash derived
    /// from (session, input hash), so rebuilt inputs change outputs the way
    /// a real compiler's would.
    #[derive(Clone, Default)]
    pub struct FakeRunner {
        scripts: Arc<Mutex<BTreeMap<SessionName, ScriptedJob>>>,
        spawned: Arc<Mutex<Vec<SessionName>>>,
    }

    impl FakeRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn script(&self, name: impl Into<SessionName>, job: ScriptedJob) {
            self.scripts.lock().insert(name.into(), job);
        }

        /// Sessions spawned so far, in spawn order.
        pub fn spawned(&self) -> Vec<SessionName> {
            self.spawned.lock().clone()
        }
    }

    #[async_trait]
    impl JobRunner for FakeRunner {
        type Handle = FakeHandle;

        async fn spawn(&self, spec: JobSpec) -> Result<FakeHandle, RunnerError> {
            self.spawned.lock().push(spec.name.clone());
            let script = self.scripts.lock().get(&spec.name).cloned().unwrap_or_default();
            let output_hash = script.output_hash.clone().unwrap_or_else(|| {
                ContentHash::chain([
                    &ContentHash::of_str(spec.name.as_str()),
                    &spec.input_hash,
                ])
            });
            Ok(FakeHandle {
                outcome: RunOutcome {
                    exit_code: script.exit_code,
                    output: script.output,
                    timing: script.timing,
                    output_hash,
                },
                polls_left: script.polls,
                cancelled: false,
            })
        }
    }

    /// Handle for a scripted job.
    pub struct FakeHandle {
        outcome: RunOutcome,
        polls_left: u32,
        cancelled: bool,
    }

    impl JobHandle for FakeHandle {
        fn try_join(&mut self) -> Option<RunOutcome> {
            if self.cancelled {
                return Some(RunOutcome {
                    exit_code: 130,
                    output: vec!["cancelled".to_string()],
                    timing: Timing::default(),
                    output_hash: ContentHash::of_str(""),
                });
            }
            if self.polls_left > 0 {
                self.polls_left -= 1;
                return None;
            }
            Some(self.outcome.clone())
        }

        fn cancel(&mut self) {
            self.cancelled = true;
        }
    }
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
