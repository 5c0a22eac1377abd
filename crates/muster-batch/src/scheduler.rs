use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use muster_core::config::RunConfig;
use muster_core::error::{MusterError, Result};
use muster_core::event::{BatchEvent, EventBus};
use muster_core::filter::NodeFilter;
use muster_core::traits::{AgentClient, ProgressSink};
use muster_core::types::{CommandSpec, Node, NodeId, NodeSet, NodeState, RunId, RunStats};

use crate::stats::StatsAggregator;
use crate::tracker::{NodeTracker, TerminalOutcome, TrackerEvent};

/// Concurrency-bounded batch scheduler.
///
/// Admits nodes from a FIFO queue into execution so that the number of
/// concurrently executing nodes never exceeds the configured limit, waits
/// for in-flight nodes to reach a terminal state over a single event
/// channel, and folds outcomes into aggregate run statistics.
///
/// Individual node failures and timeouts never abort a run; the only
/// run-aborting conditions are precondition violations (caught before any
/// dispatch) and a fatal agent client error.
pub struct BatchScheduler {
    client: Arc<dyn AgentClient>,
    config: RunConfig,
    event_bus: Arc<EventBus>,
    cancel: CancellationToken,
}

impl BatchScheduler {
    pub fn new(
        client: Arc<dyn AgentClient>,
        config: RunConfig,
        event_bus: Arc<EventBus>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            config,
            event_bus,
            cancel,
        }
    }

    /// Resolve the target node set for a batch run.
    ///
    /// Compound filters are refused before the client is ever called:
    /// they cannot be safely re-evaluated per batch.
    pub async fn discover(&self, filter: &NodeFilter) -> Result<NodeSet> {
        if filter.is_compound() {
            return Err(MusterError::CompoundFilter(filter.to_string()));
        }
        let ids = self.client.discover(filter.clone()).await?;
        Ok(NodeSet::from_ids(ids))
    }

    /// Run one command across the node set, at most `concurrency` nodes at
    /// a time, and return the aggregate statistics.
    ///
    /// An empty node set is a no-op success with zero counts. On a fatal
    /// transport error the partial statistics are published in a
    /// [`BatchEvent::RunAborted`] event and the error is returned.
    pub async fn run(
        &self,
        nodes: NodeSet,
        command: CommandSpec,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<RunStats> {
        let concurrency = self.config.validate()?;
        let run_id = RunId::new();
        let total = nodes.len();
        let mut stats = StatsAggregator::new();

        if nodes.is_empty() {
            debug!(run_id = %run_id, "Empty node set, nothing to dispatch");
            return Ok(stats.finalize());
        }

        self.event_bus.publish(BatchEvent::RunStarted {
            run_id: run_id.clone(),
            total,
            concurrency,
        });
        emit(
            sink.as_ref(),
            format!("batch {run_id} started: {total} nodes, concurrency {concurrency}"),
        );
        info!(run_id = %run_id, total, concurrency, command = %command, "Batch run started");

        let (tx, mut rx) = mpsc::channel::<TrackerEvent>(self.config.event_buffer.max(1));
        let mut queue: VecDeque<NodeId> = nodes.into_iter().collect();
        let mut in_flight: HashMap<NodeId, Node> = HashMap::new();
        let child_cancel = self.cancel.child_token();

        let deadline = self
            .config
            .run_timeout()
            .map(|budget| tokio::time::Instant::now() + budget);
        let run_deadline = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(run_deadline);

        let mut admitting = true;
        let mut fatal: Option<MusterError> = None;

        loop {
            // Fill free slots in FIFO queue order.
            while admitting && in_flight.len() < concurrency {
                let Some(id) = queue.pop_front() else { break };

                let mut node = Node::new(id.clone());
                apply_transition(&mut node, NodeState::Dispatched);
                stats.note_dispatched();

                let tracker = NodeTracker::new(
                    id.clone(),
                    command.clone(),
                    Arc::clone(&self.client),
                    self.config.node_timeout(),
                    child_cancel.clone(),
                    tx.clone(),
                );
                tokio::spawn(tracker.drive());

                in_flight.insert(id.clone(), node);
                self.event_bus
                    .publish(BatchEvent::NodeAdmitted { node: id.clone() });
                emit(
                    sink.as_ref(),
                    format!("{id} admitted ({} in flight)", in_flight.len()),
                );
                debug!(node = %id, in_flight = in_flight.len(), "Node admitted");
            }

            if in_flight.is_empty() {
                break;
            }

            // Wait for at least one in-flight node to report. This receive
            // is the scheduler's only suspension point.
            let event = if admitting {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        admitting = false;
                        child_cancel.cancel();
                        queue.clear();
                        let msg = format!(
                            "cancellation requested, abandoning {} in-flight nodes",
                            in_flight.len()
                        );
                        warn!(run_id = %run_id, "{msg}");
                        emit(sink.as_ref(), msg);
                        continue;
                    }
                    _ = &mut run_deadline, if deadline.is_some() => {
                        admitting = false;
                        child_cancel.cancel();
                        queue.clear();
                        let msg = format!(
                            "run timeout reached, abandoning {} in-flight nodes",
                            in_flight.len()
                        );
                        warn!(run_id = %run_id, "{msg}");
                        emit(sink.as_ref(), msg);
                        continue;
                    }
                    event = rx.recv() => event,
                }
            } else {
                match tokio::time::timeout(self.config.abandon_grace(), rx.recv()).await {
                    Ok(event) => event,
                    Err(_) => {
                        // Abandoned trackers failed to report within the
                        // grace period; record the stragglers ourselves.
                        for (id, _node) in in_flight.drain() {
                            let outcome = TerminalOutcome::TimedOut { abandoned: true };
                            if stats.record(&id, &outcome) {
                                self.event_bus.publish(BatchEvent::NodeTimedOut {
                                    node: id.clone(),
                                    abandoned: true,
                                });
                                emit(sink.as_ref(), format!("{id} abandoned without a report"));
                            }
                        }
                        break;
                    }
                }
            };

            match event {
                Some(TrackerEvent::Running { node }) => {
                    if let Some(entry) = in_flight.get_mut(&node) {
                        apply_transition(entry, NodeState::Running);
                        self.event_bus
                            .publish(BatchEvent::NodeRunning { node: node.clone() });
                        emit(sink.as_ref(), format!("{node} running"));
                    }
                }
                Some(TrackerEvent::Terminal { node, outcome }) => {
                    self.settle(&mut in_flight, &mut stats, &node, outcome, sink.as_ref());
                }
                Some(TrackerEvent::Fatal { node, error }) => {
                    warn!(node = %node, error = %error, "Agent client failed, aborting batch");
                    in_flight.remove(&node);
                    let detail = error.to_string();
                    let outcome = TerminalOutcome::Failed {
                        detail: detail.clone(),
                    };
                    if stats.record(&node, &outcome) {
                        self.event_bus.publish(BatchEvent::NodeFailed {
                            node: node.clone(),
                            detail: detail.clone(),
                        });
                        emit(sink.as_ref(), format!("{node} failed: {detail}"));
                    }
                    fatal = Some(error);
                    admitting = false;
                    child_cancel.cancel();
                    queue.clear();
                }
                None => {
                    warn!(run_id = %run_id, "Tracker channel closed unexpectedly");
                    break;
                }
            }
        }

        let final_stats = stats.finalize();
        match fatal {
            Some(error) => {
                self.event_bus.publish(BatchEvent::RunAborted {
                    run_id: run_id.clone(),
                    stats: final_stats.clone(),
                    error: error.to_string(),
                });
                emit(sink.as_ref(), format!("batch {run_id} aborted: {error}"));
                info!(run_id = %run_id, error = %error, "Batch run aborted");
                Err(error)
            }
            None => {
                self.event_bus.publish(BatchEvent::RunComplete {
                    run_id: run_id.clone(),
                    stats: final_stats.clone(),
                });
                emit(
                    sink.as_ref(),
                    format!(
                        "batch {run_id} complete: {} succeeded, {} failed, {} timed out in {}ms",
                        final_stats.succeeded,
                        final_stats.failed,
                        final_stats.timed_out,
                        final_stats.elapsed_ms
                    ),
                );
                info!(
                    run_id = %run_id,
                    succeeded = final_stats.succeeded,
                    failed = final_stats.failed,
                    timed_out = final_stats.timed_out,
                    "Batch run complete"
                );
                Ok(final_stats)
            }
        }
    }

    /// Apply a terminal outcome: free the slot, update the node record,
    /// and record the outcome exactly once.
    fn settle(
        &self,
        in_flight: &mut HashMap<NodeId, Node>,
        stats: &mut StatsAggregator,
        node: &NodeId,
        outcome: TerminalOutcome,
        sink: &dyn ProgressSink,
    ) {
        let Some(mut entry) = in_flight.remove(node) else {
            warn!(node = %node, "Terminal event for a node not in flight, ignoring");
            return;
        };

        match &outcome {
            TerminalOutcome::Succeeded { payload } => {
                apply_transition(&mut entry, NodeState::Succeeded);
                entry.payload = Some(payload.clone());
            }
            TerminalOutcome::Failed { detail } => {
                apply_transition(&mut entry, NodeState::Failed);
                entry.error = Some(detail.clone());
            }
            TerminalOutcome::TimedOut { abandoned } => {
                apply_transition(&mut entry, NodeState::TimedOut);
                entry.error = Some(
                    if *abandoned {
                        "abandoned before completion"
                    } else {
                        "no terminal status within budget"
                    }
                    .to_string(),
                );
            }
        }

        if !stats.record(node, &outcome) {
            return;
        }

        match outcome {
            TerminalOutcome::Succeeded { .. } => {
                self.event_bus
                    .publish(BatchEvent::NodeSucceeded { node: node.clone() });
                emit(sink, format!("{node} succeeded"));
            }
            TerminalOutcome::Failed { detail } => {
                self.event_bus.publish(BatchEvent::NodeFailed {
                    node: node.clone(),
                    detail: detail.clone(),
                });
                emit(sink, format!("{node} failed: {detail}"));
            }
            TerminalOutcome::TimedOut { abandoned } => {
                self.event_bus.publish(BatchEvent::NodeTimedOut {
                    node: node.clone(),
                    abandoned,
                });
                emit(
                    sink,
                    if abandoned {
                        format!("{node} abandoned")
                    } else {
                        format!("{node} timed out")
                    },
                );
            }
        }
    }
}

fn apply_transition(node: &mut Node, next: NodeState) {
    if let Err(error) = node.advance(next) {
        warn!(node = %node.id, %error, "Ignoring invalid node state transition");
    }
}

fn emit(sink: &dyn ProgressSink, message: String) {
    sink.emit(Utc::now(), &message);
}

#[cfg(test)]
mod tests {
    use super::*;

    use muster_test_utils::ScriptedClient;

    fn scheduler(client: Arc<ScriptedClient>, config: RunConfig) -> BatchScheduler {
        BatchScheduler::new(
            client,
            config,
            Arc::new(EventBus::default()),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_discover_rejects_compound_filter() {
        let client = Arc::new(ScriptedClient::with_fleet(["web01", "web02"]));
        let sched = scheduler(Arc::clone(&client), RunConfig::with_concurrency(2));

        let filter = NodeFilter::Compound {
            expr: "class=web and country=fr".into(),
        };
        let err = sched.discover(&filter).await.unwrap_err();
        assert!(matches!(err, MusterError::CompoundFilter(_)));
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_discover_dedups_in_order() {
        let client = Arc::new(ScriptedClient::with_fleet(["b", "a", "b", "c"]));
        let sched = scheduler(client, RunConfig::with_concurrency(1));

        let set = sched.discover(&NodeFilter::All).await.unwrap();
        let ids: Vec<String> = set.iter().map(|n| n.0.clone()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn test_run_rejects_missing_concurrency() {
        let client = Arc::new(ScriptedClient::with_fleet(["web01"]));
        let sched = scheduler(Arc::clone(&client), RunConfig::default());

        let nodes = NodeSet::from_ids([NodeId::new("web01")]);
        let err = sched
            .run(
                nodes,
                CommandSpec::new("service", "status"),
                Arc::new(crate::progress::BufferSink::new()),
            )
            .await
            .unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(client.trigger_count(), 0);
    }

    #[tokio::test]
    async fn test_run_rejects_non_positive_concurrency() {
        for limit in [0, -2] {
            let client = Arc::new(ScriptedClient::with_fleet(["web01"]));
            let sched = scheduler(Arc::clone(&client), RunConfig::with_concurrency(limit));

            let nodes = NodeSet::from_ids([NodeId::new("web01")]);
            let err = sched
                .run(
                    nodes,
                    CommandSpec::new("service", "status"),
                    Arc::new(crate::progress::BufferSink::new()),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, MusterError::InvalidConcurrency(n) if n == limit));
            assert_eq!(client.trigger_count(), 0);
        }
    }
}
