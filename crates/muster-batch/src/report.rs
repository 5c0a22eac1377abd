use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use muster_core::event::{BatchEvent, EventBus};
use muster_core::types::RunId;

/// JSONL batch report writer.
///
/// Subscribes to the event bus and writes one JSON object per event. The
/// format is append-only and crash-resilient: even if the process dies
/// mid-run, all previously written lines are intact.
pub struct BatchReporter {
    report_dir: PathBuf,
}

/// A single report line.
#[derive(Serialize)]
struct ReportEntry {
    timestamp: String,
    run_id: String,
    event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    node: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<serde_json::Value>,
}

impl BatchReporter {
    /// Reports are written to `{report_dir}/{run_id}.jsonl`.
    pub fn new(report_dir: PathBuf) -> Self {
        Self { report_dir }
    }

    /// Run the reporter as a background task.
    ///
    /// Writes JSONL until cancellation or until the run completes or
    /// aborts.
    pub async fn run(self, event_bus: Arc<EventBus>, run_id: RunId, cancel: CancellationToken) {
        if let Err(e) = tokio::fs::create_dir_all(&self.report_dir).await {
            error!(error = %e, "Failed to create report directory");
            return;
        }

        let report_path = self.report_dir.join(format!("{}.jsonl", run_id.0));

        let file = match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&report_path)
            .await
        {
            Ok(f) => f,
            Err(e) => {
                error!(error = %e, path = %report_path.display(), "Failed to open report file");
                return;
            }
        };

        info!(path = %report_path.display(), "Batch reporter started");

        let mut writer = tokio::io::BufWriter::new(file);
        let mut rx = event_bus.subscribe();
        let rid = run_id.0.clone();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Batch reporter cancelled");
                    break;
                }
                result = rx.recv() => {
                    match result {
                        Ok(event) => {
                            let entry = event_to_entry(&rid, &event);

                            if let Ok(json) = serde_json::to_string(&entry) {
                                let line = format!("{}\n", json);
                                if let Err(e) = writer.write_all(line.as_bytes()).await {
                                    error!(error = %e, "Failed to write report entry");
                                    break;
                                }
                                // Flush after each entry for crash resilience
                                if let Err(e) = writer.flush().await {
                                    error!(error = %e, "Failed to flush report");
                                }
                            }

                            if matches!(
                                event,
                                BatchEvent::RunComplete { .. } | BatchEvent::RunAborted { .. }
                            ) {
                                break;
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            debug!(skipped = n, "Batch reporter lagged, skipped events");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            debug!("Event bus closed, batch reporter stopping");
                            break;
                        }
                    }
                }
            }
        }

        // Final flush
        writer.flush().await.ok();
        debug!(path = %report_path.display(), "Batch reporter finished");
    }
}

/// Convert a batch event to a report line.
fn event_to_entry(run_id: &str, event: &BatchEvent) -> ReportEntry {
    let entry = |event_type: &str, node: Option<String>, detail: Option<serde_json::Value>| {
        ReportEntry {
            timestamp: Utc::now().to_rfc3339(),
            run_id: run_id.to_string(),
            event_type: event_type.to_string(),
            node,
            detail,
        }
    };

    match event {
        BatchEvent::RunStarted {
            total, concurrency, ..
        } => entry(
            "run_started",
            None,
            Some(serde_json::json!({ "total": total, "concurrency": concurrency })),
        ),
        BatchEvent::NodeAdmitted { node } => entry("node_admitted", Some(node.0.clone()), None),
        BatchEvent::NodeRunning { node } => entry("node_running", Some(node.0.clone()), None),
        BatchEvent::NodeSucceeded { node } => entry("node_succeeded", Some(node.0.clone()), None),
        BatchEvent::NodeFailed { node, detail } => entry(
            "node_failed",
            Some(node.0.clone()),
            Some(serde_json::json!({ "detail": detail })),
        ),
        BatchEvent::NodeTimedOut { node, abandoned } => entry(
            "node_timed_out",
            Some(node.0.clone()),
            Some(serde_json::json!({ "abandoned": abandoned })),
        ),
        BatchEvent::RunComplete { stats, .. } => entry(
            "run_complete",
            None,
            serde_json::to_value(stats).ok(),
        ),
        BatchEvent::RunAborted { stats, error, .. } => entry(
            "run_aborted",
            None,
            Some(serde_json::json!({
                "stats": serde_json::to_value(stats).ok(),
                "error": error,
            })),
        ),
    }
}
