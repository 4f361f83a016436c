// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Content hashes for sources, options, and build outputs.
//!
//! Every cache decision in the engine compares these hashes; they are
//! hex-encoded SHA-256 digests and compare as plain strings.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Errors from parsing a stored hash
#[derive(Debug, Error)]
pub enum HashError {
    #[error("invalid hash literal (expected 64 hex chars): {0}")]
    Invalid(String),
}

/// A hex-encoded SHA-256 content hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash raw bytes.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(format!("{:x}", Sha256::digest(bytes)))
    }

    /// Hash a string.
    pub fn of_str(s: &str) -> Self {
        Self::of_bytes(s.as_bytes())
    }

    /// Combine an ordered sequence of hashes into one digest.
    ///
    /// The caller fixes the order (ancestor hashes are combined in session
    /// name order) so the result is deterministic across workers.
    pub fn chain<'a>(parts: impl IntoIterator<Item = &'a ContentHash>) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.0.as_bytes());
            hasher.update(b"\n");
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    /// The input hash of a session with no ancestors.
    pub fn bootstrap() -> Self {
        Self::of_str("kiln.bootstrap")
    }

    /// Parse a stored hex literal, validating shape.
    pub fn parse(s: &str) -> Result<Self, HashError> {
        if s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(Self(s.to_string()))
        } else {
            Err(HashError::Invalid(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the hash truncated to at most `n` characters, for log lines.
    pub fn short(&self, n: usize) -> &str {
        crate::id::short(&self.0, n)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
#[path = "hash_tests.rs"]
mod tests;
