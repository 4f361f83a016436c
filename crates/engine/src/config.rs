// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine configuration.

use std::path::PathBuf;

/// Knobs for one worker's build loop.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Directory of the shared store
    pub store_dir: PathBuf,
    /// Directory holding per-session artifact files
    pub artifacts_dir: PathBuf,
    /// Maximum concurrently running jobs in this worker
    pub max_jobs: usize,
    /// Locality slot indices available for placement (empty = no binding)
    pub numa_nodes: Vec<usize>,
    /// Ignore cached results and rebuild everything
    pub fresh: bool,
    /// Record failures instead of spawning jobs (explicit no-build mode)
    pub no_build: bool,
    /// Replay verbose progress messages too
    pub verbose: bool,
    /// Sleep between scheduling attempts when nothing started or finished
    pub idle_sleep_ms: u64,
    /// Multiplier applied to every session timeout
    pub timeout_scale: f64,
    /// Hostname reported in placements and worker rows
    pub host: String,
    /// Platform descriptor recorded on the build row
    pub platform: String,
    /// Serialized option snapshot recorded on the build row
    pub options: String,
}

impl BuildConfig {
    pub fn new(store_dir: impl Into<PathBuf>, artifacts_dir: impl Into<PathBuf>) -> Self {
        Self {
            store_dir: store_dir.into(),
            artifacts_dir: artifacts_dir.into(),
            max_jobs: 1,
            numa_nodes: Vec::new(),
            fresh: false,
            no_build: false,
            verbose: false,
            idle_sleep_ms: 500,
            timeout_scale: 1.0,
            host: hostname(),
            platform: platform(),
            options: String::new(),
        }
    }

    kiln_core::setters! {
        into {
            host: String,
            platform: String,
            options: String,
        }
        set {
            max_jobs: usize,
            numa_nodes: Vec<usize>,
            fresh: bool,
            no_build: bool,
            verbose: bool,
            idle_sleep_ms: u64,
            timeout_scale: f64,
        }
    }

    /// Effective timeout for a session, after scaling. Zero disables it.
    pub fn scaled_timeout_ms(&self, timeout_ms: u64) -> u64 {
        (timeout_ms as f64 * self.timeout_scale) as u64
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

fn platform() -> String {
    format!("{}-{}", std::env::consts::ARCH, std::env::consts::OS)
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
