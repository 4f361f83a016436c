// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The session dependency graph.
//!
//! Built once per build from the project descriptor, then read-only. The
//! graph rejects duplicate names, unknown references, and cycles before any
//! scheduling starts, and precomputes the two quantities the scheduler
//! orders by: transitive ancestor sets and estimated remaining work.

use crate::descriptor::ProjectDesc;
use crate::sources::{hash_options, hash_sources, SourceError};
use kiln_core::{BuildId, ContentHash, SessionMeta, SessionName};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

/// Errors from building the session graph. All fatal: the build aborts
/// before scheduling starts.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Aggregated validation report naming every offending session.
    #[error("invalid session structure:\n{}", issues.join("\n"))]
    Invalid { issues: Vec<String> },
    #[error(transparent)]
    Sources(#[from] SourceError),
}

/// Historical timings: session name to observed elapsed ms in a prior build.
pub type Timings = HashMap<SessionName, u64>;

/// Read-only dependency graph of sessions with per-session metadata.
#[derive(Debug, Clone)]
pub struct SessionGraph {
    metas: BTreeMap<SessionName, SessionMeta>,
    /// Topological order, dependencies first
    order: Vec<SessionName>,
    /// Estimated remaining work: own estimate plus every descendant's,
    /// computed once at construction
    remaining_ms: HashMap<SessionName, u64>,
}

impl SessionGraph {
    /// Build the graph for `build_id` from a descriptor and prior timings.
    ///
    /// Validation collects every duplicate name, undeclared reference, and
    /// dependency cycle into one aggregated error.
    pub fn load(desc: &ProjectDesc, timings: &Timings, build_id: &BuildId) -> Result<Self, GraphError> {
        let mut issues: Vec<String> = Vec::new();

        // Map-keyed sessions cannot collide, but a parent duplicated in
        // imports is a declaration error worth naming.
        for session in desc.sessions.values() {
            let mut seen: BTreeSet<&str> = BTreeSet::new();
            for dep in session.declared_deps() {
                if !seen.insert(dep) {
                    issues.push(format!("session {}: duplicate dependency {}", session.name, dep));
                }
                if !desc.sessions.contains_key(dep) {
                    issues.push(format!("session {}: unknown dependency {}", session.name, dep));
                }
                if dep == session.name {
                    issues.push(format!("session {}: depends on itself", session.name));
                }
            }
        }
        if !issues.is_empty() {
            return Err(GraphError::Invalid { issues });
        }

        // Edges point dependency -> dependent, so topological order yields
        // dependencies first and forward reachability yields descendants.
        let mut graph: DiGraph<SessionName, ()> = DiGraph::new();
        let mut nodes: HashMap<SessionName, NodeIndex> = HashMap::new();
        for name in desc.sessions.keys() {
            let session = SessionName::new(name.clone());
            let idx = graph.add_node(session.clone());
            nodes.insert(session, idx);
        }
        for session in desc.sessions.values() {
            let Some(&to) = nodes.get(session.name.as_str()) else { continue };
            for dep in session.declared_deps() {
                if let Some(&from) = nodes.get(dep) {
                    graph.add_edge(from, to, ());
                }
            }
        }

        for scc in tarjan_scc(&graph) {
            if scc.len() > 1 {
                let mut members: Vec<String> =
                    scc.iter().map(|idx| graph[*idx].to_string()).collect();
                members.sort();
                issues.push(format!("dependency cycle: {}", members.join(" -> ")));
            }
        }
        if !issues.is_empty() {
            return Err(GraphError::Invalid { issues });
        }

        // Cycle-free, so toposort cannot fail; fall back to insertion order
        // rather than panic if petgraph ever disagrees.
        let order: Vec<NodeIndex> =
            petgraph::algo::toposort(&graph, None).unwrap_or_else(|_| graph.node_indices().collect());

        // Ancestor closure in topological order: deps are finished first.
        let mut ancestors: HashMap<NodeIndex, BTreeSet<SessionName>> = HashMap::new();
        for &idx in &order {
            let mut set = BTreeSet::new();
            for dep in graph.neighbors_directed(idx, Direction::Incoming) {
                set.insert(graph[dep].clone());
                if let Some(dep_anc) = ancestors.get(&dep) {
                    set.extend(dep_anc.iter().cloned());
                }
            }
            ancestors.insert(idx, set);
        }

        // Descendant sets in reverse topological order; kept as sets so a
        // diamond counts each descendant once.
        let mut descendants: HashMap<NodeIndex, BTreeSet<SessionName>> = HashMap::new();
        for &idx in order.iter().rev() {
            let mut set = BTreeSet::new();
            for child in graph.neighbors_directed(idx, Direction::Outgoing) {
                set.insert(graph[child].clone());
                if let Some(child_desc) = descendants.get(&child) {
                    set.extend(child_desc.iter().cloned());
                }
            }
            descendants.insert(idx, set);
        }

        let estimate = |name: &SessionName| timings.get(name).copied().unwrap_or(0);

        let mut metas = BTreeMap::new();
        let mut remaining_ms = HashMap::new();
        for (name, &idx) in &nodes {
            let session = &desc.sessions[name.as_str()];
            let sources_hash = match &session.sources {
                Some(dir) => hash_sources(&desc.root.join(dir))?,
                None => ContentHash::of_str(""),
            };
            let deps: BTreeSet<SessionName> =
                session.declared_deps().into_iter().map(SessionName::new).collect();

            let remaining = estimate(name)
                + descendants[&idx].iter().map(|d| estimate(d)).sum::<u64>();
            remaining_ms.insert(name.clone(), remaining);

            metas.insert(
                name.clone(),
                SessionMeta {
                    name: name.clone(),
                    deps,
                    ancestors: ancestors[&idx].clone(),
                    options_hash: hash_options(&session.options),
                    sources_hash,
                    timeout_ms: session.timeout_ms,
                    estimate_ms: estimate(name),
                    keep_artifact: session.keep_artifact,
                    timings: serde_json::Value::Null,
                    build_id: build_id.clone(),
                },
            );
        }

        let order: Vec<SessionName> = order.into_iter().map(|idx| graph[idx].clone()).collect();
        tracing::info!(sessions = metas.len(), "session graph loaded");
        Ok(Self { metas, order, remaining_ms })
    }

    /// Per-session metadata, keyed by name.
    pub fn get(&self, name: &SessionName) -> Option<&SessionMeta> {
        self.metas.get(name)
    }

    /// All sessions in topological order, dependencies first.
    pub fn topological_order(&self) -> &[SessionName] {
        &self.order
    }

    /// Iterate all session metadata in name order.
    pub fn sessions(&self) -> impl Iterator<Item = &SessionMeta> {
        self.metas.values()
    }

    pub fn len(&self) -> usize {
        self.metas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metas.is_empty()
    }

    /// Estimated remaining work for scheduling: the session's own estimate
    /// plus the estimates of everything that can only run after it.
    pub fn remaining_ms(&self, name: &SessionName) -> u64 {
        self.remaining_ms.get(name).copied().unwrap_or(0)
    }
}

#[cfg(test)]
#[path = "graph_tests.rs"]
mod tests;
