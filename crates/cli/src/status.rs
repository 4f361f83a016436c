// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Plain-text rendering of a store snapshot.

use kiln_core::format_elapsed_ms;
use kiln_store::StoreSnapshot;
use std::fmt::Write as _;

/// Render builds, workers, and session states for `kiln status`.
pub fn render(snapshot: &StoreSnapshot, now_ms: u64) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "serial: {}", snapshot.serial);

    for build in snapshot.builds.values() {
        let state = if build.progress_stopped {
            "stopped"
        } else if build.is_active() {
            "active"
        } else {
            "finished"
        };
        let _ = writeln!(out, "build {} [{}] {} ({})", build.id, build.platform, state, build.options);

        for worker in snapshot.active_workers(&build.id) {
            let _ = writeln!(
                out,
                "  worker {} on {} pid {} (heartbeat {} ago, serial {})",
                worker.id,
                worker.host,
                worker.pid,
                format_elapsed_ms(worker.heartbeat_age_ms(now_ms)),
                worker.last_serial,
            );
        }

        let results = snapshot.results_for(&build.id);
        let ok = results.values().filter(|r| r.status.is_ok()).count();
        let _ = writeln!(
            out,
            "  sessions: {} ok / {} finished, {} running, {} pending",
            ok,
            results.len(),
            snapshot.running.len(),
            snapshot.pending.len(),
        );
        for job in snapshot.running.values() {
            let node = job.placement.node.map(|n| format!(" node {n}")).unwrap_or_default();
            let _ = writeln!(out, "  running {} on {}{}", job.name, job.placement.host, node);
        }
    }

    if snapshot.builds.is_empty() {
        let _ = writeln!(out, "no builds");
    }
    out
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
