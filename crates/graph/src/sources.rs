// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deterministic hashing of session inputs.

use kiln_core::ContentHash;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from hashing a source tree
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("cannot read sources under {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Hash a session's source directory.
///
/// Files are visited in sorted relative-path order and hashed as
/// (path, contents) pairs, so the result is stable across hosts and
/// filesystem iteration orders. A missing directory hashes as empty,
/// letting descriptor-only sessions participate in caching.
pub fn hash_sources(dir: &Path) -> Result<ContentHash, SourceError> {
    let mut files: Vec<PathBuf> = Vec::new();
    if dir.is_dir() {
        collect_files(dir, dir, &mut files)?;
    }
    files.sort();

    let mut parts: Vec<ContentHash> = Vec::with_capacity(files.len() * 2);
    for rel in &files {
        let contents = std::fs::read(dir.join(rel)).map_err(|source| SourceError::Read {
            path: dir.join(rel),
            source,
        })?;
        parts.push(ContentHash::of_str(&rel.to_string_lossy()));
        parts.push(ContentHash::of_bytes(&contents));
    }
    Ok(ContentHash::chain(parts.iter()))
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), SourceError> {
    let entries = std::fs::read_dir(dir).map_err(|source| SourceError::Read {
        path: dir.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| SourceError::Read {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            out.push(rel.to_path_buf());
        }
    }
    Ok(())
}

/// Fingerprint a session's option settings.
///
/// Options hash as sorted `key=value` lines; BTreeMap ordering makes the
/// fingerprint independent of declaration order.
pub fn hash_options(options: &BTreeMap<String, String>) -> ContentHash {
    let mut canonical = String::new();
    for (key, value) in options {
        canonical.push_str(key);
        canonical.push('=');
        canonical.push_str(value);
        canonical.push('\n');
    }
    ContentHash::of_str(&canonical)
}

#[cfg(test)]
#[path = "sources_tests.rs"]
mod tests;
