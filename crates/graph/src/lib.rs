// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! kiln-graph: session dependency resolution for the Kiln build scheduler
//!
//! Takes a project descriptor, validates the declared sessions, and produces
//! the read-only [`SessionGraph`] the engine schedules from: per-session
//! metadata, transitive ancestor sets, a deterministic content hash of each
//! session's inputs, and duration estimates from prior runs.

pub mod descriptor;
pub mod graph;
pub mod sources;

pub use descriptor::{ProjectDesc, SessionDesc};
pub use graph::{GraphError, SessionGraph, Timings};
pub use sources::{hash_options, hash_sources, SourceError};
