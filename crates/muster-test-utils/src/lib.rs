//! Shared test fakes for the Muster crates.
//!
//! The main fixture is [`ScriptedClient`], an in-memory agent client with
//! per-node scripted outcomes and an instrumented in-flight gauge, used to
//! assert scheduling properties without a real transport.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use rand::Rng;

use muster_core::error::{MusterError, Result};
use muster_core::filter::NodeFilter;
use muster_core::traits::AgentClient;
use muster_core::types::{ClientStats, CommandSpec, NodeId, NodeOutcome, TriggerAck};

/// Scripted behavior for one node. Unscripted nodes succeed.
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    Succeed { payload: serde_json::Value },
    Fail { detail: String },
    RejectTrigger { reason: String },
    /// Never delivers a terminal outcome.
    Hang,
    /// The client itself dies on the trigger call.
    FatalOnTrigger,
    /// The client itself dies while watching.
    FatalOnWatch,
}

/// In-memory agent client driven by a per-node script.
///
/// Tracks the number of nodes between trigger acceptance and outcome
/// delivery (the in-flight window) along with the maximum ever observed,
/// and records the order of trigger calls.
pub struct ScriptedClient {
    fleet: Vec<NodeId>,
    outcomes: HashMap<NodeId, ScriptedOutcome>,
    latency: Duration,
    jitter_ms: u64,
    current: AtomicUsize,
    max_in_flight: AtomicUsize,
    ok_count: AtomicU64,
    fail_count: AtomicU64,
    trigger_order: Mutex<Vec<NodeId>>,
    started: Instant,
}

impl ScriptedClient {
    /// Client whose fleet is the given identities, all succeeding.
    pub fn with_fleet<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fleet: ids.into_iter().map(|s| NodeId::new(s)).collect(),
            outcomes: HashMap::new(),
            latency: Duration::from_millis(5),
            jitter_ms: 0,
            current: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            ok_count: AtomicU64::new(0),
            fail_count: AtomicU64::new(0),
            trigger_order: Mutex::new(Vec::new()),
            started: Instant::now(),
        }
    }

    /// Script the outcome for one node.
    pub fn script(mut self, id: impl Into<String>, outcome: ScriptedOutcome) -> Self {
        self.outcomes.insert(NodeId::new(id), outcome);
        self
    }

    /// Base latency between trigger acceptance and outcome delivery.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Add up to `jitter_ms` of random extra latency per node, to shake
    /// out ordering assumptions.
    pub fn with_jitter_ms(mut self, jitter_ms: u64) -> Self {
        self.jitter_ms = jitter_ms;
        self
    }

    /// Highest number of simultaneously in-flight nodes ever observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Nodes currently inside the in-flight window.
    pub fn in_flight_now(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    /// Trigger calls observed, in order.
    pub fn trigger_order(&self) -> Vec<NodeId> {
        match self.trigger_order.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => Vec::new(),
        }
    }

    pub fn trigger_count(&self) -> usize {
        self.trigger_order().len()
    }

    async fn pause(&self) {
        let jitter = if self.jitter_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=self.jitter_ms))
        } else {
            Duration::ZERO
        };
        let delay = self.latency + jitter;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn leave_flight(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AgentClient for ScriptedClient {
    fn discover(&self, filter: NodeFilter) -> BoxFuture<'_, Result<Vec<NodeId>>> {
        Box::pin(async move {
            match filter {
                NodeFilter::Compound { .. } => {
                    Err(MusterError::CompoundFilter(filter.to_string()))
                }
                NodeFilter::Identity { names } => Ok(self
                    .fleet
                    .iter()
                    .filter(|id| names.contains(&id.0))
                    .cloned()
                    .collect()),
                _ => Ok(self.fleet.clone()),
            }
        })
    }

    fn trigger(&self, node: NodeId, _command: CommandSpec) -> BoxFuture<'_, Result<TriggerAck>> {
        Box::pin(async move {
            if let Ok(mut order) = self.trigger_order.lock() {
                order.push(node.clone());
            }

            match self.outcomes.get(&node) {
                Some(ScriptedOutcome::RejectTrigger { reason }) => {
                    return Ok(TriggerAck::Rejected {
                        reason: reason.clone(),
                    });
                }
                Some(ScriptedOutcome::FatalOnTrigger) => {
                    return Err(MusterError::Transport("connection lost".into()));
                }
                _ => {}
            }

            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            Ok(TriggerAck::Accepted)
        })
    }

    fn watch(&self, node: NodeId) -> BoxFuture<'_, Result<NodeOutcome>> {
        Box::pin(async move {
            self.pause().await;

            if matches!(self.outcomes.get(&node), Some(ScriptedOutcome::Hang)) {
                futures::future::pending::<()>().await;
            }

            match self.outcomes.get(&node) {
                Some(ScriptedOutcome::Fail { detail }) => {
                    self.fail_count.fetch_add(1, Ordering::SeqCst);
                    self.leave_flight();
                    Ok(NodeOutcome::Failed {
                        detail: detail.clone(),
                    })
                }
                Some(ScriptedOutcome::FatalOnWatch) => {
                    self.leave_flight();
                    Err(MusterError::Transport("connection lost".into()))
                }
                Some(ScriptedOutcome::Succeed { payload }) => {
                    self.ok_count.fetch_add(1, Ordering::SeqCst);
                    self.leave_flight();
                    Ok(NodeOutcome::Succeeded {
                        payload: payload.clone(),
                    })
                }
                _ => {
                    self.ok_count.fetch_add(1, Ordering::SeqCst);
                    self.leave_flight();
                    Ok(NodeOutcome::Succeeded {
                        payload: serde_json::json!({ "status": "ok" }),
                    })
                }
            }
        })
    }

    fn stats(&self) -> BoxFuture<'_, Result<ClientStats>> {
        Box::pin(async move {
            Ok(ClientStats {
                ok_count: self.ok_count.load(Ordering::SeqCst),
                fail_count: self.fail_count.load(Ordering::SeqCst),
                elapsed_ms: self.started.elapsed().as_millis() as u64,
            })
        })
    }
}

/// Initialize tracing for tests. Safe to call repeatedly.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
