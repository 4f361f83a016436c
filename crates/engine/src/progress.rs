// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Progress output and echo suppression.
//!
//! Every worker appends its messages to the shared log and replays the
//! messages other workers appended, through the same sink, in serial order.
//! The echo set remembers serials this process wrote itself so drains do
//! not print them twice.

use kiln_core::{MessageKind, ProgressMessage};
use std::collections::BTreeSet;

/// Where replayed progress messages go.
pub trait ProgressSink: Send {
    fn emit(&self, message: &ProgressMessage);
}

/// Default sink: build-facing lines to stdout, everything through tracing.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink {
    /// Also print messages flagged verbose
    pub verbose: bool,
}

impl ProgressSink for LogSink {
    fn emit(&self, message: &ProgressMessage) {
        match message.kind {
            MessageKind::Error => tracing::error!(serial = message.serial, "{}", message.text),
            MessageKind::Warning => tracing::warn!(serial = message.serial, "{}", message.text),
            _ => tracing::info!(serial = message.serial, "{}", message.text),
        }
        if !message.verbose || self.verbose {
            println!("{}", message.text);
        }
    }
}

/// Tracks which part of the shared log this worker has already replayed.
#[derive(Debug, Default)]
pub struct Echo {
    /// Highest serial already replayed or written
    pub watermark: u64,
    /// Serials written by this process, pending suppression on drain
    own: BTreeSet<u64>,
}

impl Echo {
    /// Note a message this process just appended itself.
    pub fn wrote(&mut self, serial: u64) {
        self.own.insert(serial);
        self.watermark = self.watermark.max(serial);
    }

    /// Replay freshly pulled messages, skipping our own.
    pub fn replay(&mut self, messages: &[ProgressMessage], sink: &dyn ProgressSink) {
        for message in messages {
            let ours = self.own.remove(&message.serial);
            if !ours {
                sink.emit(message);
            }
            self.watermark = self.watermark.max(message.serial);
        }
    }
}

/// Recording sink for tests.
#[cfg(any(test, feature = "test-support"))]
pub use fake::MemorySink;

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::ProgressSink;
    use kiln_core::ProgressMessage;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Sink that records every emitted message.
    #[derive(Debug, Clone, Default)]
    pub struct MemorySink {
        inner: Arc<Mutex<Vec<ProgressMessage>>>,
    }

    impl MemorySink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn messages(&self) -> Vec<ProgressMessage> {
            self.inner.lock().clone()
        }

        pub fn texts(&self) -> Vec<String> {
            self.inner.lock().iter().map(|m| m.text.clone()).collect()
        }
    }

    impl ProgressSink for MemorySink {
        fn emit(&self, message: &ProgressMessage) {
            self.inner.lock().push(message.clone());
        }
    }
}

#[cfg(test)]
#[path = "progress_tests.rs"]
mod tests;
