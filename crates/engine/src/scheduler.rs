// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job selection and placement.
//!
//! The pick order is a total order, so two workers looking at identical
//! state agree on the next session; reproducible tests depend on this.

use crate::state::BuildState;
use kiln_core::{Placement, SessionName};
use kiln_graph::SessionGraph;

/// Pick the next session to start, if any.
///
/// Order among ready, not-running tasks: larger estimated remaining work
/// first, then larger configured timeout, then lexical name order. Returns
/// `None` when the parallelism limit is reached, the build is stopped, or
/// nothing is ready.
pub fn next_ready(
    state: &BuildState,
    graph: &SessionGraph,
    max_jobs: usize,
    stopped: bool,
) -> Option<SessionName> {
    if stopped || state.running.len() >= max_jobs {
        return None;
    }
    state
        .ready()
        .map(|task| &task.name)
        .min_by(|a, b| {
            let key = |name: &SessionName| {
                let timeout = state.sessions.get(name).map(|s| s.timeout_ms).unwrap_or(0);
                (graph.remaining_ms(name), timeout)
            };
            // min_by with reversed work/timeout keys puts the largest first
            key(b).cmp(&key(a)).then_with(|| a.cmp(b))
        })
        .cloned()
}

/// Assign a locality slot to a job about to start.
///
/// Prefers the slot under the rotating cursor if free, otherwise the first
/// free slot after it, otherwise the first configured slot (oversubscribing
/// only when every slot is taken). The cursor advances past the chosen slot
/// so consecutive jobs spread across slots.
pub fn allocate_placement(state: &mut BuildState, nodes: &[usize], host: &str) -> Placement {
    if nodes.is_empty() {
        return Placement::unbound(host);
    }

    let used: Vec<usize> = state.running.values().filter_map(|job| job.placement.node).collect();
    let cursor = state.numa_next % nodes.len();

    let position = (0..nodes.len())
        .map(|offset| (cursor + offset) % nodes.len())
        .find(|&pos| !used.contains(&nodes[pos]))
        .unwrap_or(0);

    state.numa_next = (position + 1) % nodes.len();
    Placement::new(host, Some(nodes[position]))
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
