// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session identity and per-session metadata.
//!
//! A session is one unit of compilation work. Its metadata is fixed when the
//! graph is loaded for a build; only the queue/running/result tables change
//! afterwards.

use crate::build::BuildId;
use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeSet;
use std::fmt;

/// Unique name of a session within a build.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionName(pub String);

impl SessionName {
    /// Create a new SessionName from any string-like value.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the string value of this SessionName.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl PartialEq<str> for SessionName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for SessionName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl Borrow<str> for SessionName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Immutable per-session metadata, loaded once per build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    /// Session name (unique key)
    pub name: SessionName,
    /// Direct dependencies: the declared parent plus imports
    pub deps: BTreeSet<SessionName>,
    /// Transitive ancestor set (excludes the session itself)
    pub ancestors: BTreeSet<SessionName>,
    /// Fingerprint of the session's option settings
    pub options_hash: ContentHash,
    /// Content hash of the session's sources
    pub sources_hash: ContentHash,
    /// Configured timeout for one run of this session
    pub timeout_ms: u64,
    /// Duration estimate from prior runs (0 when never built)
    pub estimate_ms: u64,
    /// Whether a finished artifact must be retained for this session
    pub keep_artifact: bool,
    /// Prior per-command timing blob, passed through opaquely
    pub timings: serde_json::Value,
    /// Owning build
    pub build_id: BuildId,
}

impl SessionMeta {
    /// Whether this session depends (directly or transitively) on `other`.
    pub fn depends_on(&self, other: &SessionName) -> bool {
        self.ancestors.contains(other)
    }
}

crate::builder! {
    pub struct SessionMetaBuilder => SessionMeta {
        into {
            name: SessionName = "s",
            options_hash: ContentHash = ContentHash::of_str("options"),
            sources_hash: ContentHash = ContentHash::of_str("sources"),
            build_id: BuildId = BuildId::from_string("bld-test"),
        }
        set {
            deps: BTreeSet<SessionName> = BTreeSet::new(),
            ancestors: BTreeSet<SessionName> = BTreeSet::new(),
            timeout_ms: u64 = 0,
            estimate_ms: u64 = 0,
            keep_artifact: bool = false,
        }
        computed {
            timings: serde_json::Value = serde_json::Value::Null,
        }
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
