// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Progress messages: the shared, totally ordered event log of a build.

use crate::build::BuildId;
use serde::{Deserialize, Serialize};

/// Kind tag of a progress message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Ordinary output line
    Writeln,
    /// Warning
    Warning,
    /// Error report
    Error,
    /// Session status change (started, finished, cached)
    Status,
}

crate::simple_display! {
    MessageKind {
        Writeln => "writeln",
        Warning => "warning",
        Error => "error",
        Status => "status",
    }
}

/// One row in the progress table.
///
/// The serial is allocated by the store under lock, so the table's order is
/// the canonical event order of the build; every worker replays it
/// identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressMessage {
    /// Strictly increasing serial (unique key)
    pub serial: u64,
    /// Kind tag
    pub kind: MessageKind,
    /// Message text
    pub text: String,
    /// Only shown when verbose output is requested
    pub verbose: bool,
    /// Owning build
    pub build_id: BuildId,
}

#[cfg(test)]
#[path = "progress_tests.rs"]
mod tests;
