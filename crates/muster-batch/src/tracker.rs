use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use muster_core::error::MusterError;
use muster_core::traits::AgentClient;
use muster_core::types::{CommandSpec, NodeId, NodeOutcome, TriggerAck};

/// Terminal outcome of one tracked node.
#[derive(Debug, Clone)]
pub enum TerminalOutcome {
    Succeeded { payload: serde_json::Value },
    Failed { detail: String },
    /// `abandoned` distinguishes cancellation from an expired budget.
    TimedOut { abandoned: bool },
}

/// Transition report sent to the scheduler over its single event channel.
#[derive(Debug)]
pub enum TrackerEvent {
    /// The agent acknowledged the trigger; informational, the node still
    /// holds its slot.
    Running { node: NodeId },
    /// The node reached a terminal state; its slot is free.
    Terminal {
        node: NodeId,
        outcome: TerminalOutcome,
    },
    /// The agent client itself failed; the run must abort.
    Fatal { node: NodeId, error: MusterError },
}

/// Drives one admitted node from trigger to terminal outcome.
///
/// A tracker mutates only its own node and reports every transition back
/// through the shared channel, so the scheduler remains the single
/// observer of all state changes. A tracker sends at most one terminal
/// event.
pub struct NodeTracker {
    node: NodeId,
    command: CommandSpec,
    client: Arc<dyn AgentClient>,
    timeout: Duration,
    cancel: CancellationToken,
    events: mpsc::Sender<TrackerEvent>,
}

impl NodeTracker {
    pub fn new(
        node: NodeId,
        command: CommandSpec,
        client: Arc<dyn AgentClient>,
        timeout: Duration,
        cancel: CancellationToken,
        events: mpsc::Sender<TrackerEvent>,
    ) -> Self {
        Self {
            node,
            command,
            client,
            timeout,
            cancel,
            events,
        }
    }

    /// Run the node to its terminal state. Intended to be spawned.
    pub async fn drive(self) {
        // Dispatched: issue the trigger, unless abandoned first.
        let ack = tokio::select! {
            _ = self.cancel.cancelled() => {
                self.report_terminal(TerminalOutcome::TimedOut { abandoned: true }).await;
                return;
            }
            ack = self.client.trigger(self.node.clone(), self.command.clone()) => ack,
        };

        let ack = match ack {
            Ok(ack) => ack,
            Err(error) => {
                let _ = self
                    .events
                    .send(TrackerEvent::Fatal {
                        node: self.node.clone(),
                        error,
                    })
                    .await;
                return;
            }
        };

        if let TriggerAck::Rejected { reason } = ack {
            self.report_terminal(TerminalOutcome::Failed { detail: reason })
                .await;
            return;
        }

        let _ = self
            .events
            .send(TrackerEvent::Running {
                node: self.node.clone(),
            })
            .await;

        // Running: wait for the agent's terminal outcome within budget.
        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => TerminalOutcome::TimedOut { abandoned: true },
            result = tokio::time::timeout(self.timeout, self.client.watch(self.node.clone())) => {
                match result {
                    Err(_) => TerminalOutcome::TimedOut { abandoned: false },
                    Ok(Err(error)) => {
                        let _ = self
                            .events
                            .send(TrackerEvent::Fatal {
                                node: self.node.clone(),
                                error,
                            })
                            .await;
                        return;
                    }
                    Ok(Ok(NodeOutcome::Succeeded { payload })) => {
                        TerminalOutcome::Succeeded { payload }
                    }
                    Ok(Ok(NodeOutcome::Failed { detail })) => TerminalOutcome::Failed { detail },
                }
            }
        };

        self.report_terminal(outcome).await;
    }

    async fn report_terminal(&self, outcome: TerminalOutcome) {
        debug!(node = %self.node, ?outcome, "Node reached terminal state");
        let _ = self
            .events
            .send(TrackerEvent::Terminal {
                node: self.node.clone(),
                outcome,
            })
            .await;
    }
}
