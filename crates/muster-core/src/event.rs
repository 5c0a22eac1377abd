use crate::types::{NodeId, RunId, RunStats};

/// Batch run event broadcast to all subscribers. Observability only: the
/// scheduler never reads these back for control decisions.
#[derive(Debug, Clone)]
pub enum BatchEvent {
    /// A batch run began.
    RunStarted {
        run_id: RunId,
        total: usize,
        concurrency: usize,
    },
    /// A node was admitted into execution (trigger issued).
    NodeAdmitted { node: NodeId },
    /// The agent acknowledged the command as started.
    NodeRunning { node: NodeId },
    /// The agent reported successful completion.
    NodeSucceeded { node: NodeId },
    /// The agent reported an error, or the trigger was rejected.
    NodeFailed { node: NodeId, detail: String },
    /// No terminal status within budget, or the node was abandoned.
    NodeTimedOut { node: NodeId, abandoned: bool },
    /// The run finished normally; counts are final.
    RunComplete { run_id: RunId, stats: RunStats },
    /// The run was aborted by a fatal transport error; counts are partial.
    RunAborted {
        run_id: RunId,
        stats: RunStats,
        error: String,
    },
}

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<BatchEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: BatchEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<BatchEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_see_published_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish(BatchEvent::NodeAdmitted {
            node: NodeId::new("web01"),
        });

        match rx.recv().await.unwrap() {
            BatchEvent::NodeAdmitted { node } => assert_eq!(node.0, "web01"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        let bus = EventBus::default();
        bus.publish(BatchEvent::NodeSucceeded {
            node: NodeId::new("web01"),
        });
    }
}
