// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Feed prior observed durations back into the next graph's estimates.

use anyhow::Result;
use kiln_core::SessionName;
use kiln_graph::graph::Timings;
use std::collections::HashMap;
use std::path::Path;

/// Latest observed elapsed time per session, from executed ok results.
///
/// An empty or missing store yields no history, which the graph treats as
/// estimate zero.
pub fn from_store(store_dir: &Path) -> Result<Timings> {
    if !store_dir.exists() {
        return Ok(Timings::new());
    }
    let snapshot = kiln_engine::engine::snapshot(store_dir)?;

    // Most recent executed ok result per session, by build start time.
    // Cache hits carry no fresh timing.
    let mut best: HashMap<SessionName, (u64, u64)> = HashMap::new();
    for result in &snapshot.results {
        if !result.status.is_ok() || result.current {
            continue;
        }
        let started =
            snapshot.builds.get(&result.build_id).map(|b| b.started_at).unwrap_or(0);
        let newer = best.get(&result.name).map(|(at, _)| started >= *at).unwrap_or(true);
        if newer {
            best.insert(result.name.clone(), (started, result.timing.elapsed_ms));
        }
    }

    Ok(best.into_iter().map(|(name, (_, elapsed))| (name, elapsed)).collect())
}

#[cfg(test)]
#[path = "timings_tests.rs"]
mod tests;
