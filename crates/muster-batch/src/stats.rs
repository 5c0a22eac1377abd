use std::collections::HashSet;
use std::time::Instant;

use muster_core::types::{NodeId, RunStats};

use crate::tracker::TerminalOutcome;

/// Folds terminal outcomes into the final run counts.
///
/// Each node's outcome is counted exactly once: duplicate terminal
/// observations are ignored. Duplicates should not occur, but they must
/// not corrupt the counts.
pub struct StatsAggregator {
    dispatched: u64,
    succeeded: u64,
    failed: u64,
    timed_out: u64,
    recorded: HashSet<NodeId>,
    started: Instant,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self {
            dispatched: 0,
            succeeded: 0,
            failed: 0,
            timed_out: 0,
            recorded: HashSet::new(),
            started: Instant::now(),
        }
    }

    /// Count a node as admitted into execution.
    pub fn note_dispatched(&mut self) {
        self.dispatched += 1;
    }

    /// Record a node's terminal outcome. Returns false if this node was
    /// already recorded.
    pub fn record(&mut self, node: &NodeId, outcome: &TerminalOutcome) -> bool {
        if !self.recorded.insert(node.clone()) {
            return false;
        }
        match outcome {
            TerminalOutcome::Succeeded { .. } => self.succeeded += 1,
            TerminalOutcome::Failed { .. } => self.failed += 1,
            TerminalOutcome::TimedOut { .. } => self.timed_out += 1,
        }
        true
    }

    /// Immutable snapshot of the counts and elapsed time.
    pub fn finalize(&self) -> RunStats {
        RunStats {
            dispatched: self.dispatched,
            succeeded: self.succeeded,
            failed: self.failed,
            timed_out: self.timed_out,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}
