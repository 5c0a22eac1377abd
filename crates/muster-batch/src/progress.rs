use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::info;

use muster_core::traits::ProgressSink;

/// Progress sink that forwards each status line to `tracing`.
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn emit(&self, timestamp: DateTime<Utc>, message: &str) {
        info!(timestamp = %timestamp.to_rfc3339(), "{message}");
    }
}

/// Progress sink that buffers status lines in memory, mainly for test
/// assertions on ordering and content.
pub struct BufferSink {
    lines: Mutex<Vec<(DateTime<Utc>, String)>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(Vec::new()),
        }
    }

    /// Messages emitted so far, in order.
    pub fn lines(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(guard) => guard.iter().map(|(_, msg)| msg.clone()).collect(),
            Err(_) => Vec::new(),
        }
    }
}

impl Default for BufferSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for BufferSink {
    fn emit(&self, timestamp: DateTime<Utc>, message: &str) {
        // A sink must never fail; a poisoned lock just drops the line.
        if let Ok(mut guard) = self.lines.lock() {
            guard.push((timestamp, message.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_sink_preserves_order() {
        let sink = BufferSink::new();
        sink.emit(Utc::now(), "first");
        sink.emit(Utc::now(), "second");
        assert_eq!(sink.lines(), vec!["first", "second"]);
    }
}
