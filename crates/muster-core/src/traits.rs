use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use crate::error::Result;
use crate::filter::NodeFilter;
use crate::types::{ClientStats, CommandSpec, NodeId, NodeOutcome, TriggerAck};

/// Transport-specific collaborator the orchestrator drives.
/// Implementations own discovery, addressing, and delivery; the
/// orchestrator treats them as a black box.
///
/// An `Err` from any method means the client itself has become unusable
/// (fatal transport loss). Per-node problems are values: a refused trigger
/// is `TriggerAck::Rejected`, an agent-side failure is
/// `NodeOutcome::Failed`.
pub trait AgentClient: Send + Sync + 'static {
    /// Enumerate agents matching the filter, in discovery order.
    fn discover(&self, filter: NodeFilter) -> BoxFuture<'_, Result<Vec<NodeId>>>;

    /// Ask one agent to start executing the command.
    fn trigger(&self, node: NodeId, command: CommandSpec) -> BoxFuture<'_, Result<TriggerAck>>;

    /// Resolve when the node reaches a terminal outcome. The caller is
    /// expected to wrap this in its own timeout budget.
    fn watch(&self, node: NodeId) -> BoxFuture<'_, Result<NodeOutcome>>;

    /// Aggregate run statistics as the client saw them. Informational
    /// only.
    fn stats(&self) -> BoxFuture<'_, Result<ClientStats>>;
}

/// Accepts timestamped human-readable status lines. Used for
/// observability only, never for control decisions, and must never fail
/// or panic.
pub trait ProgressSink: Send + Sync + 'static {
    fn emit(&self, timestamp: DateTime<Utc>, message: &str);
}
