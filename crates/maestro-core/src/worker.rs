//! Collaborator traits through which the engine discovers, instantiates and
//! invokes workers.
//!
//! The engine never constructs workers itself: a [`RosterProvider`] lists the
//! configured workers, a [`WorkerFactory`] turns a [`WorkerDescriptor`] into a
//! [`LiveWorker`], and the live worker answers prompts.

use crate::MaestroResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Static configuration of one worker, as supplied by the roster.
///
/// Never mutated by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerDescriptor {
    /// Unique worker name.
    pub name: String,
    /// Role text used as the worker's system prompt and as capability evidence.
    #[serde(default, alias = "role_text")]
    pub role: String,
    /// Additional instructions appended to the role.
    #[serde(default)]
    pub instructions: String,
    /// Short human-readable description.
    #[serde(default)]
    pub description: String,
    /// Names of the tools this worker may call.
    #[serde(default, alias = "tool_names")]
    pub tools: Vec<String>,
    /// Display color for consoles.
    #[serde(default = "default_color")]
    pub color: String,
    /// Maximum concurrent invocations of the live worker.
    #[serde(default = "default_max_instances")]
    pub max_instances: u32,
}

fn default_color() -> String {
    "white".to_string()
}

fn default_max_instances() -> u32 {
    1
}

impl WorkerDescriptor {
    /// Create a descriptor with the given name and role text.
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            instructions: String::new(),
            description: String::new(),
            tools: Vec::new(),
            color: default_color(),
            max_instances: default_max_instances(),
        }
    }

    /// Set the instructions text.
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    /// Set the description text.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the tool names.
    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }

    /// Set the display color.
    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    /// Set the concurrent invocation limit.
    pub fn with_max_instances(mut self, max: u32) -> Self {
        self.max_instances = max;
        self
    }

    /// The system prompt a live worker should run with.
    pub fn system_prompt(&self) -> String {
        if self.instructions.is_empty() {
            self.role.clone()
        } else {
            format!("{}\n\n{}", self.role, self.instructions)
        }
    }
}

/// A ready-to-use worker instance.
#[async_trait]
pub trait LiveWorker: Send + Sync {
    /// Answer a prompt. May be slow and may fail.
    async fn run(&self, prompt: &str) -> MaestroResult<String>;
}

/// Instantiates live workers from their descriptors.
///
/// Instantiation may be slow (network, model warm-up); the loader guarantees
/// it is invoked at most once per worker per load.
#[async_trait]
pub trait WorkerFactory: Send + Sync {
    /// Build a live worker for `descriptor`.
    async fn instantiate(&self, descriptor: &WorkerDescriptor) -> MaestroResult<Arc<dyn LiveWorker>>;
}

/// Source of the configured worker roster.
pub trait RosterProvider: Send + Sync {
    /// All known workers, keyed by name.
    fn list_workers(&self) -> BTreeMap<String, WorkerDescriptor>;

    /// Whether a team (director plus specialists) is configured.
    fn has_team(&self) -> bool;

    /// Look up a single worker.
    fn get(&self, name: &str) -> Option<WorkerDescriptor> {
        self.list_workers().remove(name)
    }
}
