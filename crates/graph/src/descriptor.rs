// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Project descriptor: the TOML file declaring a project's sessions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from loading a project descriptor
#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Default session timeout: one hour.
pub const DEFAULT_TIMEOUT_MS: u64 = 60 * 60 * 1000;

/// One declared session.
///
/// `parent` is the primary dependency (the session whose output this one
/// extends); `imports` add further dependencies. Both resolve the same way.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDesc {
    /// Session name (injected from map key)
    #[serde(skip)]
    pub name: String,
    /// Primary dependency, if any
    #[serde(default)]
    pub parent: Option<String>,
    /// Additional dependencies
    #[serde(default)]
    pub imports: Vec<String>,
    /// Option settings, fingerprinted into the cache key
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    /// Timeout for one run of this session
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Source directory, relative to the descriptor
    #[serde(default)]
    pub sources: Option<PathBuf>,
    /// Whether the finished artifact must be kept on disk
    #[serde(default)]
    pub keep_artifact: bool,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl SessionDesc {
    /// Parent plus imports, in declaration order, duplicates preserved.
    pub fn declared_deps(&self) -> Vec<&str> {
        self.parent
            .iter()
            .map(String::as_str)
            .chain(self.imports.iter().map(String::as_str))
            .collect()
    }
}

/// A parsed project descriptor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectDesc {
    /// Declared sessions, keyed by name
    #[serde(default)]
    pub sessions: BTreeMap<String, SessionDesc>,
    /// Root directory the `sources` paths are relative to (set on load)
    #[serde(skip)]
    pub root: PathBuf,
}

impl ProjectDesc {
    /// Load and parse a descriptor file, injecting names and the root dir.
    pub fn load(path: &Path) -> Result<Self, DescriptorError> {
        let text = std::fs::read_to_string(path).map_err(|source| DescriptorError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut desc: ProjectDesc =
            toml::from_str(&text).map_err(|source| DescriptorError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        for (name, session) in desc.sessions.iter_mut() {
            session.name = name.clone();
        }
        desc.root = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        tracing::debug!(sessions = desc.sessions.len(), path = %path.display(), "loaded project descriptor");
        Ok(desc)
    }

    /// Parse from a string, for tests and embedded descriptors.
    pub fn parse(text: &str, root: impl Into<PathBuf>) -> Result<Self, toml::de::Error> {
        let mut desc: ProjectDesc = toml::from_str(text)?;
        for (name, session) in desc.sessions.iter_mut() {
            session.name = name.clone();
        }
        desc.root = root.into();
        Ok(desc)
    }
}

#[cfg(test)]
#[path = "descriptor_tests.rs"]
mod tests;
