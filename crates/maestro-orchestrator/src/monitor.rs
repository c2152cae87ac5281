use crate::types::{ErrorContext, Stage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

/// Archived record of one finished (or parked) drive of the state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub execution_id: Uuid,
    pub thread_id: String,
    /// `completed`, `suspended` or `failed`.
    pub outcome: String,
    pub stage: Stage,
    pub workers: Vec<String>,
    pub node_timings: BTreeMap<String, f64>,
    pub duration_secs: f64,
    pub error: Option<ErrorContext>,
    pub finished_at: DateTime<Utc>,
}

struct InFlight {
    execution_id: Uuid,
    thread_id: String,
    started: Instant,
    started_at: DateTime<Utc>,
    cancel: watch::Sender<bool>,
}

/// A currently running execution, as reported by [`ExecutionMonitor::in_flight`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InFlightExecution {
    pub execution_id: Uuid,
    pub thread_id: String,
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: f64,
}

/// Tracks in-flight executions and force-fails those that outlive the ceiling.
pub struct ExecutionMonitor {
    ceiling: Duration,
    history: usize,
    /// Keyed by segment id; one execution may run several segments at once.
    inflight: RwLock<HashMap<Uuid, InFlight>>,
    summaries: RwLock<VecDeque<ExecutionSummary>>,
    stale_total: AtomicU64,
}

impl ExecutionMonitor {
    pub fn new(ceiling: Duration, history: usize) -> Self {
        Self {
            ceiling,
            history: history.max(1),
            inflight: RwLock::new(HashMap::new()),
            summaries: RwLock::new(VecDeque::new()),
            stale_total: AtomicU64::new(0),
        }
    }

    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    /// Start tracking one segment of an execution.
    ///
    /// Returns the segment id to pass to [`deregister`](Self::deregister) and a
    /// receiver that flips to `true` when the monitor cancels the segment.
    pub async fn register(
        &self,
        execution_id: Uuid,
        thread_id: &str,
    ) -> (Uuid, watch::Receiver<bool>) {
        let segment = Uuid::new_v4();
        let (cancel, receiver) = watch::channel(false);
        self.inflight.write().await.insert(
            segment,
            InFlight {
                execution_id,
                thread_id: thread_id.to_string(),
                started: Instant::now(),
                started_at: Utc::now(),
                cancel,
            },
        );
        debug!(
            execution_id = %execution_id,
            segment = %segment,
            thread_id = %thread_id,
            "Execution registered"
        );
        (segment, receiver)
    }

    pub async fn deregister(&self, segment: Uuid) -> bool {
        self.inflight.write().await.remove(&segment).is_some()
    }

    /// Cancel every segment older than the ceiling. Returns the affected execution ids.
    pub async fn sweep(&self) -> Vec<Uuid> {
        let mut inflight = self.inflight.write().await;
        let stale_segments: Vec<Uuid> = inflight
            .iter()
            .filter(|(_, run)| run.started.elapsed() > self.ceiling)
            .map(|(id, _)| *id)
            .collect();

        let mut stale = Vec::with_capacity(stale_segments.len());
        for id in &stale_segments {
            if let Some(run) = inflight.remove(id) {
                stale.push(run.execution_id);
                warn!(
                    execution_id = %run.execution_id,
                    segment = %id,
                    thread_id = %run.thread_id,
                    ceiling_secs = self.ceiling.as_secs(),
                    "Force-failing stale execution"
                );
                // The receiver may already be gone if the request just finished.
                let _ = run.cancel.send(true);
            }
        }
        self.stale_total
            .fetch_add(stale.len() as u64, Ordering::Relaxed);
        stale
    }

    /// Run [`sweep`](Self::sweep) every `interval` on a background task.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let cancelled = self.sweep().await;
                if !cancelled.is_empty() {
                    debug!(count = cancelled.len(), "Monitor sweep cancelled executions");
                }
            }
        })
    }

    pub async fn archive(&self, summary: ExecutionSummary) {
        let mut summaries = self.summaries.write().await;
        if summaries.len() >= self.history {
            summaries.pop_front();
        }
        summaries.push_back(summary);
    }

    pub async fn summaries(&self) -> Vec<ExecutionSummary> {
        self.summaries.read().await.iter().cloned().collect()
    }

    pub async fn in_flight(&self) -> Vec<InFlightExecution> {
        let inflight = self.inflight.read().await;
        let mut runs: Vec<InFlightExecution> = inflight
            .iter()
            .map(|(_, run)| InFlightExecution {
                execution_id: run.execution_id,
                thread_id: run.thread_id.clone(),
                started_at: run.started_at,
                elapsed_secs: run.started.elapsed().as_secs_f64(),
            })
            .collect();
        runs.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        runs
    }

    pub fn stale_total(&self) -> u64 {
        self.stale_total.load(Ordering::Relaxed)
    }

    pub async fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "in_flight": self.in_flight().await,
            "stale_total": self.stale_total(),
            "summaries": self.summaries().await,
        })
    }
}
