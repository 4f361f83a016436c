// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test helpers for use across crates.
//!
//! Gated behind `#[cfg(any(test, feature = "test-support"))]`.

use crate::{BuildId, ContentHash, SessionMeta, SessionName, SessionResult, SessionStatus};
use std::collections::BTreeSet;

// ── Proptest strategies ─────────────────────────────────────────────────

/// Proptest strategies for core types.
pub mod strategies {
    use crate::SessionStatus;
    use proptest::prelude::*;

    pub fn arb_session_name() -> impl Strategy<Value = crate::SessionName> {
        "[A-Za-z][A-Za-z0-9_-]{0,16}".prop_map(crate::SessionName::new)
    }

    pub fn arb_session_status() -> impl Strategy<Value = SessionStatus> {
        prop_oneof![
            Just(SessionStatus::Ok),
            Just(SessionStatus::Failed),
            Just(SessionStatus::Cancelled),
        ]
    }
}

// ── Entity factory functions ────────────────────────────────────────────

/// Session metadata with the given dependencies and defaults everywhere else.
pub fn session_meta(name: &str, deps: &[&str], build: &BuildId) -> SessionMeta {
    let deps: BTreeSet<SessionName> = deps.iter().map(|d| SessionName::new(*d)).collect();
    SessionMeta::builder()
        .name(name)
        .deps(deps.clone())
        .ancestors(deps)
        .sources_hash(ContentHash::of_str(&format!("sources:{name}")))
        .build_id(build.clone())
        .build()
}

/// A successful, executed result for `name`.
pub fn ok_result(name: &str, build: &BuildId) -> SessionResult {
    SessionResult::builder()
        .name(name)
        .build_id(build.clone())
        .status(SessionStatus::Ok)
        .output_hash(ContentHash::of_str(&format!("output:{name}")))
        .build()
}

/// A cancelled (never executed) result for `name`.
pub fn cancelled_result(name: &str, build: &BuildId) -> SessionResult {
    SessionResult::builder()
        .name(name)
        .build_id(build.clone())
        .status(SessionStatus::Cancelled)
        .exit_code(None)
        .build()
}
