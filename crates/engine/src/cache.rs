// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Incremental cache decisions.
//!
//! A session is "current" when nothing that could influence its output has
//! changed: its own options and sources, the combined hash of its ancestors'
//! outputs, the recorded output itself, and (for sessions that keep one) the
//! artifact on disk. A hash mismatch is never fatal; it just means rebuild.

use crate::state::BuildState;
use kiln_core::{ContentHash, SessionMeta, SessionName, SessionResult};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// What `start` decided for a ready session.
#[derive(Debug, Clone, PartialEq)]
pub enum StartDecision {
    /// Session and every ancestor are current: record an ok result with
    /// `current = true`, spawn nothing.
    CacheHit { input_hash: ContentHash, output_hash: ContentHash },
    /// No-build mode forbids execution: record a failed result.
    NoBuild { input_hash: ContentHash },
    /// Build stopped or an ancestor is not ok: record a cancelled result.
    Undefined { input_hash: ContentHash },
    /// Spawn the external job.
    Run { input_hash: ContentHash },
}

/// Combined hash of all ancestor outputs, in session name order, or the
/// bootstrap hash for root sessions.
pub fn input_hash(meta: &SessionMeta, results: &BTreeMap<SessionName, SessionResult>) -> ContentHash {
    if meta.ancestors.is_empty() {
        return ContentHash::bootstrap();
    }
    let parts: Vec<&ContentHash> = meta
        .ancestors
        .iter()
        .filter_map(|ancestor| results.get(ancestor).map(|r| &r.output_hash))
        .collect();
    ContentHash::chain(parts)
}

/// Decide what to do with a ready session.
///
/// `previous` is the most recent prior-build result for this session, as
/// recorded in the store; `stopped` is the build-level stop signal.
pub fn start_decision(
    meta: &SessionMeta,
    state: &BuildState,
    previous: Option<&SessionResult>,
    artifacts_dir: &Path,
    fresh: bool,
    no_build: bool,
    stopped: bool,
) -> StartDecision {
    let input = input_hash(meta, &state.results);

    let ancestors_ok = meta.ancestors.iter().all(|ancestor| {
        state.results.get(ancestor).map(|r| r.status.is_ok()).unwrap_or(false)
    });
    let ancestors_current = meta
        .ancestors
        .iter()
        .all(|ancestor| state.results.get(ancestor).map(SessionResult::is_current_ok).unwrap_or(false));

    // Cache hits take precedence over the no-build refusal.
    if !fresh && ancestors_ok && ancestors_current {
        if let Some(prev) = previous {
            if session_current(meta, prev, &input, artifacts_dir) {
                return StartDecision::CacheHit {
                    input_hash: input,
                    output_hash: prev.output_hash.clone(),
                };
            }
        }
    }

    if no_build {
        return StartDecision::NoBuild { input_hash: input };
    }
    if stopped || !ancestors_ok {
        return StartDecision::Undefined { input_hash: input };
    }
    StartDecision::Run { input_hash: input }
}

/// The per-session half of the cache check: did the previous build of this
/// session succeed with identical inputs, and is its output still intact?
fn session_current(
    meta: &SessionMeta,
    prev: &SessionResult,
    input: &ContentHash,
    artifacts_dir: &Path,
) -> bool {
    if !prev.status.is_ok() {
        return false;
    }
    if prev.options_hash != meta.options_hash || prev.sources_hash != meta.sources_hash {
        return false;
    }
    if prev.input_hash != *input {
        return false;
    }
    if meta.keep_artifact {
        match artifact_hash(artifacts_dir, &meta.name) {
            Some(on_disk) => on_disk == prev.output_hash,
            None => false,
        }
    } else {
        true
    }
}

/// Path of a session's artifact file.
pub fn artifact_path(artifacts_dir: &Path, name: &SessionName) -> PathBuf {
    artifacts_dir.join(name.as_str())
}

/// Hash of the artifact on disk, if present.
pub fn artifact_hash(artifacts_dir: &Path, name: &SessionName) -> Option<ContentHash> {
    let bytes = std::fs::read(artifact_path(artifacts_dir, name)).ok()?;
    Some(ContentHash::of_bytes(&bytes))
}

/// Remove a stale artifact before rebuilding. Missing files are fine.
pub fn reset_artifact(artifacts_dir: &Path, name: &SessionName) -> std::io::Result<()> {
    match std::fs::remove_file(artifact_path(artifacts_dir, name)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
