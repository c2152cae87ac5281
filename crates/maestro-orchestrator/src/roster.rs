use maestro_core::{MaestroError, MaestroResult, RosterProvider, WorkerDescriptor};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};

/// In-memory roster built from configuration.
///
/// The director is part of the roster; a "team" exists once at least one
/// other worker is registered next to it.
pub struct StaticRoster {
    director: String,
    workers: RwLock<BTreeMap<String, WorkerDescriptor>>,
}

impl StaticRoster {
    pub fn new(workers: Vec<WorkerDescriptor>) -> Self {
        Self::with_director("director", workers)
    }

    pub fn with_director(director: impl Into<String>, workers: Vec<WorkerDescriptor>) -> Self {
        Self {
            director: director.into(),
            workers: RwLock::new(workers.into_iter().map(|w| (w.name.clone(), w)).collect()),
        }
    }

    /// Reject rosters with blank or duplicate worker names.
    pub fn validate(workers: &[WorkerDescriptor]) -> MaestroResult<()> {
        let mut seen = BTreeSet::new();
        for worker in workers {
            if worker.name.trim().is_empty() {
                return Err(MaestroError::Config("worker name must not be empty".into()));
            }
            if !seen.insert(worker.name.as_str()) {
                return Err(MaestroError::Config(format!(
                    "duplicate worker name '{}'",
                    worker.name
                )));
            }
        }
        Ok(())
    }

    pub fn director(&self) -> &str {
        &self.director
    }

    /// Add or replace one worker. Returns the previous descriptor.
    pub fn upsert(&self, worker: WorkerDescriptor) -> Option<WorkerDescriptor> {
        self.workers.write().insert(worker.name.clone(), worker)
    }

    pub fn remove(&self, name: &str) -> Option<WorkerDescriptor> {
        self.workers.write().remove(name)
    }

    /// Swap the whole roster.
    pub fn replace(&self, workers: Vec<WorkerDescriptor>) {
        *self.workers.write() = workers.into_iter().map(|w| (w.name.clone(), w)).collect();
    }

    pub fn len(&self) -> usize {
        self.workers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.read().is_empty()
    }
}

impl RosterProvider for StaticRoster {
    fn list_workers(&self) -> BTreeMap<String, WorkerDescriptor> {
        self.workers.read().clone()
    }

    fn has_team(&self) -> bool {
        let workers = self.workers.read();
        workers.contains_key(&self.director) && workers.keys().any(|k| *k != self.director)
    }

    fn get(&self, name: &str) -> Option<WorkerDescriptor> {
        self.workers.read().get(name).cloned()
    }
}
