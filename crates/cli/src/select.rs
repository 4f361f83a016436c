// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session selection: restrict a descriptor to chosen sessions plus
//! everything they depend on.

use anyhow::{bail, Result};
use kiln_graph::ProjectDesc;
use std::collections::BTreeSet;

/// Keep only `selected` sessions and their transitive dependencies.
/// An empty selection keeps everything.
pub fn restrict(desc: ProjectDesc, selected: &[String]) -> Result<ProjectDesc> {
    if selected.is_empty() {
        return Ok(desc);
    }

    let unknown: Vec<&String> =
        selected.iter().filter(|name| !desc.sessions.contains_key(*name)).collect();
    if !unknown.is_empty() {
        bail!(
            "unknown session(s): {}",
            unknown.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
        );
    }

    let mut keep: BTreeSet<String> = BTreeSet::new();
    let mut queue: Vec<String> = selected.to_vec();
    while let Some(name) = queue.pop() {
        if !keep.insert(name.clone()) {
            continue;
        }
        if let Some(session) = desc.sessions.get(&name) {
            queue.extend(session.declared_deps().into_iter().map(str::to_string));
        }
    }

    let mut desc = desc;
    desc.sessions.retain(|name, _| keep.contains(name));
    Ok(desc)
}

#[cfg(test)]
#[path = "select_tests.rs"]
mod tests;
