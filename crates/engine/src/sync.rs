// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reconciliation primitives for the synchronization protocol.
//!
//! Two merge strategies cover every domain: append-only domains (sessions,
//! results) merge by key difference and never overwrite local rows; mutable
//! domains (pending, running) are replaced wholesale by the store's
//! snapshot. Pushes go the other way as a symmetric difference against the
//! last-known store snapshot, so a worker only writes rows it actually
//! changed.

use std::collections::BTreeMap;

/// Merge strategy of a reconciled domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Merge {
    /// Rows are never mutated: adopt remote rows for keys missing locally.
    AppendOnly,
    /// Rows mutate in place: the store's snapshot wins entirely.
    Replace,
}

/// Pull one domain from the store into local state.
pub fn merge<K: Ord, V>(strategy: Merge, local: &mut BTreeMap<K, V>, remote: BTreeMap<K, V>) {
    match strategy {
        Merge::AppendOnly => {
            for (key, row) in remote {
                local.entry(key).or_insert(row);
            }
        }
        Merge::Replace => {
            *local = remote;
        }
    }
}

/// Row changes a push must apply to one store table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diff<K, V> {
    pub insert: Vec<V>,
    pub remove: Vec<K>,
}

impl<K, V> Diff<K, V> {
    pub fn is_empty(&self) -> bool {
        self.insert.is_empty() && self.remove.is_empty()
    }
}

/// Symmetric difference of local state against the last-known store
/// snapshot: rows to insert (added or changed locally) and keys to delete
/// (removed locally).
pub fn diff<K: Ord + Clone, V: Clone + PartialEq>(
    last_known: &BTreeMap<K, V>,
    current: &BTreeMap<K, V>,
) -> Diff<K, V> {
    let mut out = Diff { insert: Vec::new(), remove: Vec::new() };
    for (key, row) in current {
        if last_known.get(key) != Some(row) {
            out.insert.push(row.clone());
        }
    }
    for key in last_known.keys() {
        if !current.contains_key(key) {
            out.remove.push(key.clone());
        }
    }
    out
}

#[cfg(test)]
#[path = "sync_tests.rs"]
mod tests;
