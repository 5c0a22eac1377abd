use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MusterError, Result};

/// Unique, stable identity of a remote agent.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for one batch run.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-node lifecycle state.
///
/// `Succeeded`, `Failed`, and `TimedOut` are terminal: no transition
/// leaves them. `Dispatched -> TimedOut` is allowed for nodes abandoned
/// before the trigger was ever acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Queued,
    Dispatched,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl NodeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }

    /// Whether `next` is a legal successor of this state.
    pub fn can_advance(&self, next: NodeState) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Dispatched)
                | (Self::Dispatched, Self::Running)
                | (Self::Dispatched, Self::Failed)
                | (Self::Dispatched, Self::TimedOut)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::TimedOut)
        )
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Dispatched => "dispatched",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed out",
        };
        write!(f, "{}", s)
    }
}

/// One remote agent inside a batch run: identity, current state, and its
/// last-known outcome. Discarded when the run terminates.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub state: NodeState,
    /// Collaborator-defined result payload, opaque to the orchestrator.
    pub payload: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl Node {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            state: NodeState::Queued,
            payload: None,
            error: None,
        }
    }

    /// Advance the state machine, rejecting transitions out of terminal
    /// states and any skip not in the transition table.
    pub fn advance(&mut self, next: NodeState) -> Result<()> {
        if !self.state.can_advance(next) {
            return Err(MusterError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}

/// Ordered, duplicate-free set of node identities. Order is discovery
/// order and is the FIFO admission order for a batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSet(Vec<NodeId>);

impl NodeSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Build from identities, dropping duplicates while preserving
    /// first-seen order.
    pub fn from_ids(ids: impl IntoIterator<Item = NodeId>) -> Self {
        let mut seen = std::collections::HashSet::new();
        let mut ordered = Vec::new();
        for id in ids {
            if seen.insert(id.clone()) {
                ordered.push(id);
            }
        }
        Self(ordered)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeId> {
        self.0.iter()
    }
}

impl IntoIterator for NodeSet {
    type Item = NodeId;
    type IntoIter = std::vec::IntoIter<NodeId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl FromIterator<NodeId> for NodeSet {
    fn from_iter<T: IntoIterator<Item = NodeId>>(iter: T) -> Self {
        Self::from_ids(iter)
    }
}

/// Opaque command descriptor forwarded to the agent client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Remote agent plugin to address (e.g., "service").
    pub agent: String,
    /// Action to invoke on that plugin (e.g., "restart").
    pub action: String,
    /// Action parameters, opaque to the orchestrator.
    #[serde(default)]
    pub params: serde_json::Value,
}

impl CommandSpec {
    pub fn new(agent: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            action: action.into(),
            params: serde_json::Value::Null,
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.agent, self.action)
    }
}

/// Agent client response to a trigger request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerAck {
    /// The agent acknowledged the command as started.
    Accepted,
    /// The agent refused the command (still a per-node outcome, not a
    /// transport failure).
    Rejected { reason: String },
}

/// Terminal outcome reported by the agent client for one node.
#[derive(Debug, Clone)]
pub enum NodeOutcome {
    Succeeded { payload: serde_json::Value },
    Failed { detail: String },
}

/// Post-hoc run statistics as reported by the agent client. Informational
/// only; the orchestrator's own counts are authoritative.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientStats {
    pub ok_count: u64,
    pub fail_count: u64,
    pub elapsed_ms: u64,
}

/// Aggregate statistics for one batch run. Read-only once the run
/// completes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    /// Nodes admitted into execution.
    pub dispatched: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    /// Total run time in milliseconds.
    pub elapsed_ms: u64,
}

impl RunStats {
    /// Terminal outcomes recorded.
    pub fn total(&self) -> u64 {
        self.succeeded + self.failed + self.timed_out
    }

    /// Whether every dispatched node succeeded.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.timed_out == 0 && self.succeeded == self.dispatched
    }
}
