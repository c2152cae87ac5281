use crate::capability::CapabilityIndex;
use crate::types::{Capability, WorkerStatus};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use maestro_core::{
    LiveWorker, MaestroError, MaestroResult, RosterProvider, WorkerDescriptor, WorkerFactory,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Number of recent load times kept for the rolling average.
const LOAD_TIME_WINDOW: usize = 50;

struct HandleState {
    status: WorkerStatus,
    instance: Option<Arc<dyn LiveWorker>>,
    capabilities: Vec<Capability>,
    load_time_secs: f64,
    last_error: Option<String>,
}

/// The loader's record of one worker: lifecycle status, live instance and usage counters.
///
/// Exactly one handle per worker name is registered in a [`WorkerLoader`] at a
/// time. Status changes follow [`WorkerStatus::can_transition_to`]; counters are
/// atomic so concurrent requests sharing a ready worker never lose updates.
pub struct WorkerHandle {
    descriptor: WorkerDescriptor,
    load_seq: u64,
    state: RwLock<HandleState>,
    usage_count: AtomicU64,
    error_count: AtomicU32,
    last_used_at: Mutex<Option<DateTime<Utc>>>,
    permits: Semaphore,
}

impl WorkerHandle {
    fn new(descriptor: WorkerDescriptor, load_seq: u64, inherited_errors: u32) -> Self {
        let permits = Semaphore::new(descriptor.max_instances.max(1) as usize);
        Self {
            descriptor,
            load_seq,
            state: RwLock::new(HandleState {
                status: WorkerStatus::NotLoaded,
                instance: None,
                capabilities: Vec::new(),
                load_time_secs: 0.0,
                last_error: None,
            }),
            usage_count: AtomicU64::new(0),
            error_count: AtomicU32::new(inherited_errors),
            last_used_at: Mutex::new(None),
            permits,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &WorkerDescriptor {
        &self.descriptor
    }

    pub fn status(&self) -> WorkerStatus {
        self.state.read().status
    }

    pub fn capabilities(&self) -> Vec<Capability> {
        self.state.read().capabilities.clone()
    }

    pub fn load_time_secs(&self) -> f64 {
        self.state.read().load_time_secs
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.read().last_error.clone()
    }

    pub fn usage_count(&self) -> u64 {
        self.usage_count.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub fn last_used_at(&self) -> Option<DateTime<Utc>> {
        *self.last_used_at.lock()
    }

    /// Invoke the live worker, honoring the descriptor's `max_instances` limit.
    pub async fn run(&self, prompt: &str) -> MaestroResult<String> {
        let instance = {
            let state = self.state.read();
            match (&state.instance, state.status) {
                (Some(instance), WorkerStatus::Ready | WorkerStatus::Deprecated) => {
                    Arc::clone(instance)
                }
                _ => {
                    return Err(MaestroError::ExecutionError {
                        worker: self.name().to_string(),
                        reason: format!("worker is {}", state.status),
                    })
                }
            }
        };

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| MaestroError::ExecutionError {
                worker: self.name().to_string(),
                reason: e.to_string(),
            })?;

        instance.run(prompt).await.map_err(|e| match e {
            MaestroError::ExecutionError { .. } | MaestroError::ExecutionTimeout { .. } => e,
            other => MaestroError::ExecutionError {
                worker: self.name().to_string(),
                reason: other.to_string(),
            },
        })
    }

    /// Point-in-time view for metrics and display.
    pub fn snapshot(&self) -> WorkerSnapshot {
        let state = self.state.read();
        WorkerSnapshot {
            name: self.descriptor.name.clone(),
            status: state.status,
            capabilities: state.capabilities.iter().map(|c| c.name.clone()).collect(),
            load_time_secs: state.load_time_secs,
            usage_count: self.usage_count(),
            error_count: self.error_count(),
            last_used_at: self.last_used_at(),
            last_error: state.last_error.clone(),
        }
    }

    fn transition(&self, to: WorkerStatus) -> bool {
        let mut state = self.state.write();
        if !state.status.can_transition_to(to) {
            warn!(
                worker = %self.descriptor.name,
                from = %state.status,
                to = %to,
                "Rejected worker status transition"
            );
            return false;
        }
        state.status = to;
        true
    }

    fn mark_ready(
        &self,
        instance: Arc<dyn LiveWorker>,
        capabilities: Vec<Capability>,
        load_time_secs: f64,
    ) -> bool {
        let mut state = self.state.write();
        if !state.status.can_transition_to(WorkerStatus::Ready) {
            return false;
        }
        state.status = WorkerStatus::Ready;
        state.instance = Some(instance);
        state.capabilities = capabilities;
        state.load_time_secs = load_time_secs;
        true
    }

    fn mark_failed(&self, reason: &str, load_time_secs: f64) {
        if self.transition(WorkerStatus::Error) {
            let mut state = self.state.write();
            state.last_error = Some(reason.to_string());
            state.load_time_secs = load_time_secs;
        }
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    fn touch(&self) {
        self.usage_count.fetch_add(1, Ordering::Relaxed);
        *self.last_used_at.lock() = Some(Utc::now());
    }

    fn record_error(&self) -> u32 {
        self.error_count.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Serializable view of a [`WorkerHandle`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub name: String,
    pub status: WorkerStatus,
    pub capabilities: Vec<String>,
    pub load_time_secs: f64,
    pub usage_count: u64,
    pub error_count: u32,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Aggregate loader counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoaderMetrics {
    /// Initialization attempts.
    pub total_loads: u64,
    pub failed_loads: u64,
    pub cache_hits: u64,
    /// Average over the most recent successful loads.
    pub average_load_time_secs: f64,
    pub loaded_workers: usize,
}

/// Lazily instantiates workers and caches their handles.
///
/// Initialization of one worker name is serialized by a per-name async lock;
/// different names load in parallel.
pub struct WorkerLoader {
    roster: Arc<dyn RosterProvider>,
    factory: Arc<dyn WorkerFactory>,
    index: Arc<CapabilityIndex>,
    handles: RwLock<HashMap<String, Arc<WorkerHandle>>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    next_seq: AtomicU64,
    total_loads: AtomicU64,
    failed_loads: AtomicU64,
    cache_hits: AtomicU64,
    load_times: Mutex<VecDeque<f64>>,
}

impl WorkerLoader {
    pub fn new(
        roster: Arc<dyn RosterProvider>,
        factory: Arc<dyn WorkerFactory>,
        index: Arc<CapabilityIndex>,
    ) -> Self {
        Self {
            roster,
            factory,
            index,
            handles: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            total_loads: AtomicU64::new(0),
            failed_loads: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            load_times: Mutex::new(VecDeque::with_capacity(LOAD_TIME_WINDOW)),
        }
    }

    /// Get a ready handle for `name`, loading the worker on first use.
    ///
    /// Concurrent callers for the same name share a single initialization and
    /// observe the same outcome: the same handle, or the same `InitFailed` reason.
    pub async fn get(&self, name: &str) -> MaestroResult<Arc<WorkerHandle>> {
        let observed = self.handle(name);
        if let Some(handle) = &observed {
            if handle.status() == WorkerStatus::Ready {
                return Ok(self.hit(handle));
            }
        }
        // Only a settled outcome counts as "seen"; an in-progress load that
        // finishes while we wait is shared, not repeated.
        let seen_seq = observed
            .filter(|h| h.status() != WorkerStatus::Initializing)
            .map(|h| h.load_seq);

        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        let mut inherited_errors = 0;
        if let Some(current) = self.handle(name) {
            let fresh = Some(current.load_seq) != seen_seq;
            match current.status() {
                WorkerStatus::Ready => return Ok(self.hit(&current)),
                WorkerStatus::Error if fresh => {
                    return Err(MaestroError::InitFailed {
                        worker: name.to_string(),
                        reason: current.last_error().unwrap_or_default(),
                    });
                }
                WorkerStatus::Error => {
                    info!(worker = %name, "Reloading worker after failed initialization");
                    inherited_errors = current.error_count();
                }
                status => {
                    warn!(worker = %name, status = %status, "Replacing abandoned worker handle");
                    inherited_errors = current.error_count();
                }
            }
        }

        self.initialize(name, inherited_errors).await
    }

    async fn initialize(&self, name: &str, inherited_errors: u32) -> MaestroResult<Arc<WorkerHandle>> {
        let descriptor = self
            .roster
            .get(name)
            .ok_or_else(|| MaestroError::NotFound(name.to_string()))?;

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = Arc::new(WorkerHandle::new(descriptor.clone(), seq, inherited_errors));
        handle.transition(WorkerStatus::Initializing);
        if let Some(previous) = self
            .handles
            .write()
            .insert(name.to_string(), Arc::clone(&handle))
        {
            previous.transition(WorkerStatus::Deprecated);
        }

        info!(worker = %name, "Initializing worker");
        self.total_loads.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();

        match self.factory.instantiate(&descriptor).await {
            Ok(instance) => {
                let capabilities = self.index.capabilities_for(&descriptor);
                let elapsed = start.elapsed().as_secs_f64();
                if !handle.mark_ready(instance, capabilities, elapsed) {
                    self.failed_loads.fetch_add(1, Ordering::Relaxed);
                    return Err(MaestroError::InitFailed {
                        worker: name.to_string(),
                        reason: "worker was unloaded during initialization".to_string(),
                    });
                }
                self.push_load_time(elapsed);
                handle.touch();
                info!(
                    worker = %name,
                    load_time_secs = elapsed,
                    capabilities = handle.capabilities().len(),
                    "Worker ready"
                );
                Ok(handle)
            }
            Err(e) => {
                let reason = match &e {
                    MaestroError::InitFailed { reason, .. } => reason.clone(),
                    other => other.to_string(),
                };
                handle.mark_failed(&reason, start.elapsed().as_secs_f64());
                self.failed_loads.fetch_add(1, Ordering::Relaxed);
                warn!(
                    worker = %name,
                    error = %reason,
                    error_count = handle.error_count(),
                    "Worker initialization failed"
                );
                Err(MaestroError::InitFailed {
                    worker: name.to_string(),
                    reason,
                })
            }
        }
    }

    /// Warm up several workers concurrently. Failures are logged, not returned.
    ///
    /// Returns the number of workers that ended up ready.
    pub async fn preload(&self, names: &[String]) -> usize {
        let results = join_all(names.iter().map(|name| self.get(name))).await;
        let mut ready = 0;
        for (name, result) in names.iter().zip(results) {
            match result {
                Ok(_) => ready += 1,
                Err(e) => warn!(worker = %name, error = %e, "Preload failed"),
            }
        }
        info!(requested = names.len(), ready, "Preload finished");
        ready
    }

    /// Remove a worker's handle, lock and cached capabilities. Idempotent.
    pub fn unload(&self, name: &str) -> bool {
        let removed = self.handles.write().remove(name);
        self.locks.lock().remove(name);
        self.index.invalidate(name);
        match removed {
            Some(handle) => {
                handle.transition(WorkerStatus::Deprecated);
                debug!(worker = %name, "Worker unloaded");
                true
            }
            None => false,
        }
    }

    /// Unload every worker and drop all cached capabilities.
    pub fn unload_all(&self) -> usize {
        let drained: Vec<Arc<WorkerHandle>> =
            self.handles.write().drain().map(|(_, h)| h).collect();
        self.locks.lock().clear();
        self.index.clear();
        for handle in &drained {
            handle.transition(WorkerStatus::Deprecated);
        }
        info!(count = drained.len(), "All workers unloaded");
        drained.len()
    }

    /// Count an execution failure against a worker without changing its status.
    pub fn record_error(&self, name: &str) -> Option<u32> {
        self.handle(name).map(|h| h.record_error())
    }

    /// Current status, `NotLoaded` for workers without a handle.
    pub fn status(&self, name: &str) -> WorkerStatus {
        self.handle(name)
            .map_or(WorkerStatus::NotLoaded, |h| h.status())
    }

    pub fn error_count(&self, name: &str) -> u32 {
        self.handle(name).map_or(0, |h| h.error_count())
    }

    pub fn handle(&self, name: &str) -> Option<Arc<WorkerHandle>> {
        self.handles.read().get(name).cloned()
    }

    pub fn snapshot(&self) -> Vec<WorkerSnapshot> {
        let mut snapshots: Vec<WorkerSnapshot> =
            self.handles.read().values().map(|h| h.snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    pub fn metrics(&self) -> LoaderMetrics {
        let load_times = self.load_times.lock();
        let average_load_time_secs = if load_times.is_empty() {
            0.0
        } else {
            load_times.iter().sum::<f64>() / load_times.len() as f64
        };
        LoaderMetrics {
            total_loads: self.total_loads.load(Ordering::Relaxed),
            failed_loads: self.failed_loads.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            average_load_time_secs,
            loaded_workers: self
                .handles
                .read()
                .values()
                .filter(|h| h.status() == WorkerStatus::Ready)
                .count(),
        }
    }

    pub fn capability_index(&self) -> &Arc<CapabilityIndex> {
        &self.index
    }

    fn hit(&self, handle: &Arc<WorkerHandle>) -> Arc<WorkerHandle> {
        handle.touch();
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        Arc::clone(handle)
    }

    fn lock_for(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            self.locks
                .lock()
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    fn push_load_time(&self, secs: f64) {
        let mut times = self.load_times.lock();
        if times.len() == LOAD_TIME_WINDOW {
            times.pop_front();
        }
        times.push_back(secs);
    }
}
