use chrono::{DateTime, Utc};
use maestro_core::{CheckpointRequest, MaestroError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use uuid::Uuid;

/// Reserved `results` key under which synthesis stores the combined report.
pub const SYNTHESIS_KEY: &str = "synthesis";

/// Lifecycle status of a worker handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    NotLoaded,
    Initializing,
    Ready,
    Error,
    /// Removed from the loader while still referenced by in-flight requests.
    Deprecated,
}

impl WorkerStatus {
    /// Checks if a handle may move from `self` to `to`.
    ///
    /// A `Ready` handle never goes back to `Initializing`; reloading always
    /// happens on a fresh handle after an unload.
    pub fn can_transition_to(&self, to: Self) -> bool {
        match (self, to) {
            (a, b) if *a == b => true,
            (Self::NotLoaded, Self::Initializing) => true,
            (Self::Initializing, Self::Ready | Self::Error | Self::Deprecated) => true,
            (Self::Ready, Self::Deprecated) => true,
            (Self::Error, Self::Deprecated) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStatus::NotLoaded => write!(f, "not_loaded"),
            WorkerStatus::Initializing => write!(f, "initializing"),
            WorkerStatus::Ready => write!(f, "ready"),
            WorkerStatus::Error => write!(f, "error"),
            WorkerStatus::Deprecated => write!(f, "deprecated"),
        }
    }
}

/// A named skill tag with keyword evidence, derived from a worker's configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    pub description: String,
    /// Lowercase keywords.
    pub keywords: BTreeSet<String>,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
}

impl Capability {
    /// How well this capability fits a task description.
    ///
    /// `confidence × (0.5·[capability name appears] + 0.4·(matched keywords / total keywords))`.
    pub fn match_score(&self, description: &str) -> f64 {
        if self.keywords.is_empty() {
            return 0.0;
        }
        let lower = description.to_lowercase();
        let name_hit = if self.name_appears_in(&lower) { 0.5 } else { 0.0 };
        let keyword_ratio = self.matched_keywords(&lower).len() as f64 / self.keywords.len() as f64;
        self.confidence * (name_hit + 0.4 * keyword_ratio)
    }

    /// Keywords that occur in `text` (case-insensitive substring match).
    pub fn matched_keywords(&self, text: &str) -> Vec<&str> {
        let lower = text.to_lowercase();
        self.keywords
            .iter()
            .filter(|k| lower.contains(k.as_str()))
            .map(String::as_str)
            .collect()
    }

    fn name_appears_in(&self, lower: &str) -> bool {
        let name = self.name.to_lowercase();
        lower.contains(&name) || lower.contains(&name.replace('_', " "))
    }
}

/// Coarse complexity tier of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
    VeryComplex,
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Complexity::Simple => write!(f, "simple"),
            Complexity::Moderate => write!(f, "moderate"),
            Complexity::Complex => write!(f, "complex"),
            Complexity::VeryComplex => write!(f, "very_complex"),
        }
    }
}

/// Analysis of one incoming request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAnalysis {
    pub description: String,
    pub complexity: Complexity,
    pub required_capabilities: BTreeSet<String>,
    pub requires_collaboration: bool,
}

/// How many workers a routing decision may select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingStrategy {
    /// Only the best-scoring worker.
    #[default]
    Single,
    /// The best worker plus others covering still-missing capabilities.
    Collaborative,
    /// `Collaborative` when the task needs several capabilities, `Single` otherwise.
    Auto,
}

impl std::fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoutingStrategy::Single => write!(f, "single"),
            RoutingStrategy::Collaborative => write!(f, "collaborative"),
            RoutingStrategy::Auto => write!(f, "auto"),
        }
    }
}

/// The optimizer's answer to "who should handle this task".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Selected workers, primary first. Empty means "handle directly".
    pub selected_workers: Vec<String>,
    pub confidence: f64,
    pub reasoning: String,
    pub strategy: RoutingStrategy,
    /// Runner-up candidates with their scores.
    pub alternatives: Vec<(String, f64)>,
}

impl RoutingDecision {
    /// The primary selected worker, if any.
    pub fn primary(&self) -> Option<&str> {
        self.selected_workers.first().map(String::as_str)
    }

    /// Whether no worker was confident enough and the director should answer.
    pub fn is_direct(&self) -> bool {
        self.selected_workers.is_empty()
    }
}

/// A named state of the orchestration state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Director,
    Routing,
    SpecialistExecution,
    DirectResponse,
    AwaitingSatisfaction,
    Synthesis,
    Complete,
    Error,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Complete | Stage::Error)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Director => "director",
            Stage::Routing => "routing",
            Stage::SpecialistExecution => "specialist_execution",
            Stage::DirectResponse => "direct_response",
            Stage::AwaitingSatisfaction => "awaiting_satisfaction",
            Stage::Synthesis => "synthesis",
            Stage::Complete => "complete",
            Stage::Error => "error",
        };
        write!(f, "{name}")
    }
}

/// Failure category recorded in an [`ErrorContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    InitFailed,
    ExecutionTimeout,
    ExecutionError,
    StaleExecution,
    Internal,
}

/// Structured description of why a request ended in [`Stage::Error`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorContext {
    pub worker: Option<String>,
    pub kind: ErrorKind,
    /// Short machine-readable reason, e.g. `"timeout"`.
    pub reason: String,
    /// User-visible message.
    pub message: String,
    /// The underlying cause without the worker prefix, e.g. the provider's reason.
    #[serde(default)]
    pub detail: String,
}

impl ErrorContext {
    /// Classify an engine error.
    pub fn from_error(err: &MaestroError) -> Self {
        let (kind, reason) = match err {
            MaestroError::NotFound(_) => (ErrorKind::NotFound, "not_found"),
            MaestroError::InitFailed { .. } => (ErrorKind::InitFailed, "init_failed"),
            MaestroError::ExecutionTimeout { .. } => (ErrorKind::ExecutionTimeout, "timeout"),
            MaestroError::ExecutionError { .. } => (ErrorKind::ExecutionError, "execution_error"),
            MaestroError::StaleExecution { .. } => (ErrorKind::StaleExecution, "stale_execution"),
            _ => (ErrorKind::Internal, "internal"),
        };
        let detail = match err {
            MaestroError::InitFailed { reason, .. } | MaestroError::ExecutionError { reason, .. } => {
                reason.clone()
            }
            MaestroError::Orchestrator(msg) => msg.clone(),
            other => other.to_string(),
        };
        Self {
            worker: err.worker().map(str::to_string),
            kind,
            reason: reason.to_string(),
            message: err.to_string(),
            detail,
        }
    }

    /// Rebuild a typed error for callers that want a `Result`.
    pub fn to_error(&self, execution_id: Uuid) -> MaestroError {
        let worker = self.worker.clone().unwrap_or_default();
        let detail = if self.detail.is_empty() {
            self.message.clone()
        } else {
            self.detail.clone()
        };
        match self.kind {
            ErrorKind::NotFound => MaestroError::NotFound(worker),
            ErrorKind::InitFailed => MaestroError::InitFailed {
                worker,
                reason: detail,
            },
            ErrorKind::ExecutionTimeout => MaestroError::ExecutionTimeout {
                worker,
                seconds: parse_seconds(&self.message),
            },
            ErrorKind::ExecutionError => MaestroError::ExecutionError {
                worker,
                reason: detail,
            },
            ErrorKind::StaleExecution => MaestroError::StaleExecution {
                execution_id,
                seconds: parse_seconds(&self.message),
            },
            ErrorKind::Internal => MaestroError::Orchestrator(detail),
        }
    }
}

// Recovers the "<n>s" figure from messages such as "timed out after 300s".
fn parse_seconds(message: &str) -> u64 {
    message
        .split_whitespace()
        .filter_map(|word| word.strip_suffix('s'))
        .find_map(|n| n.parse().ok())
        .unwrap_or_default()
}

/// The human's answer at the satisfaction checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Satisfied,
    /// Anything else is treated as a follow-up request.
    MoreWork(String),
}

const AFFIRMATIVE: &[&str] = &[
    "satisfied",
    "yes",
    "y",
    "done",
    "ok",
    "okay",
    "good",
    "great",
    "perfect",
    "thanks",
    "thank you",
    "lgtm",
    "looks good",
    "that's all",
    "all good",
    "approve",
    "approved",
];

const NEGATED: &[&str] = &["not satisfied", "unsatisfied", "dissatisfied", "not done", "not good"];

fn is_affirmative(text: &str) -> bool {
    AFFIRMATIVE.contains(&text.trim_end_matches(['.', '!', ' ']))
}

impl Verdict {
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        let normalized = trimmed
            .to_lowercase()
            .trim_end_matches(['.', '!'])
            .to_string();

        if NEGATED.iter().any(|n| normalized.contains(n)) {
            return Verdict::MoreWork(trimmed.to_string());
        }
        if is_affirmative(&normalized) {
            return Verdict::Satisfied;
        }
        // "satisfied, thanks" but not "satisfied with part 1 but fix part 2".
        if let Some(rest) = normalized.strip_prefix("satisfied") {
            let rest = rest.trim_start_matches([',', ';', ':', '-', ' ']);
            if is_affirmative(rest) {
                return Verdict::Satisfied;
            }
        }
        Verdict::MoreWork(trimmed.to_string())
    }
}

/// The mutable record threaded through the state machine for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationState {
    pub execution_id: Uuid,
    /// Correlation and resume key.
    pub thread_id: String,
    pub user_input: Option<String>,
    pub stage: Stage,
    pub task_description: Option<String>,
    pub selected_worker: Option<String>,
    /// Selected workers that have not run yet for the current task.
    #[serde(default)]
    pub pending_workers: VecDeque<String>,
    pub results: BTreeMap<String, String>,
    pub node_timings: BTreeMap<String, f64>,
    pub human_response: Option<String>,
    pub error_context: Option<ErrorContext>,
    #[serde(default)]
    pub routing: Option<RoutingDecision>,
    #[serde(default)]
    pub final_response: Option<String>,
    #[serde(default)]
    pub satisfied: bool,
    /// Number of specialist results merged by the last synthesis.
    #[serde(default)]
    pub synthesized: usize,
    /// A specialist result changed since the last synthesis.
    #[serde(default)]
    pub results_dirty: bool,
    #[serde(default)]
    pub iterations: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrchestrationState {
    pub fn new(thread_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            execution_id: Uuid::new_v4(),
            thread_id: thread_id.into(),
            user_input: None,
            stage: Stage::Director,
            task_description: None,
            selected_worker: None,
            pending_workers: VecDeque::new(),
            results: BTreeMap::new(),
            node_timings: BTreeMap::new(),
            human_response: None,
            error_context: None,
            routing: None,
            final_response: None,
            satisfied: false,
            synthesized: 0,
            results_dirty: false,
            iterations: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.user_input = Some(input.into());
        self
    }

    /// Number of specialist results, excluding the synthesis report.
    pub fn specialist_result_count(&self) -> usize {
        self.results.keys().filter(|k| *k != SYNTHESIS_KEY).count()
    }

    pub fn has_pending_specialist(&self) -> bool {
        !self.pending_workers.is_empty()
    }

    /// Store a specialist's answer, replacing any earlier answer from the same worker.
    pub fn record_result(&mut self, worker: impl Into<String>, text: impl Into<String>) {
        self.results.insert(worker.into(), text.into());
        self.results_dirty = true;
    }

    /// More than one worker contributed and the latest contributions are not merged yet.
    pub fn needs_synthesis(&self) -> bool {
        self.results_dirty
            && self.specialist_result_count() > 1
            && !self.has_pending_specialist()
    }

    /// Store the human's reply in the field the current checkpoint waits for.
    ///
    /// Returns `false` when the field is already populated or the stage is not
    /// a checkpoint, so resuming twice never overwrites the first answer.
    pub fn inject(&mut self, text: impl Into<String>) -> bool {
        let slot = match self.stage {
            Stage::Director => &mut self.user_input,
            Stage::AwaitingSatisfaction => &mut self.human_response,
            _ => return false,
        };
        if slot.is_some() {
            return false;
        }
        *slot = Some(text.into());
        self.touch();
        true
    }

    /// Accumulate time spent in a stage.
    pub fn record_timing(&mut self, stage: Stage, seconds: f64) {
        *self.node_timings.entry(stage.to_string()).or_default() += seconds;
    }

    /// The text returned to the caller when the request completes.
    pub fn final_text(&self) -> String {
        if let Some(text) = &self.final_response {
            return text.clone();
        }
        if let Some(report) = self.results.get(SYNTHESIS_KEY) {
            return report.clone();
        }
        self.selected_worker
            .as_ref()
            .and_then(|w| self.results.get(w))
            .or_else(|| self.results.values().last())
            .cloned()
            .unwrap_or_default()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// How a drive of the state machine ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed {
        thread_id: String,
        response: String,
    },
    /// Parked at a checkpoint; resume with the thread id.
    Suspended {
        thread_id: String,
        checkpoint: CheckpointRequest,
    },
    Failed {
        thread_id: String,
        execution_id: Uuid,
        error: ErrorContext,
    },
}

impl RunOutcome {
    pub fn thread_id(&self) -> &str {
        match self {
            RunOutcome::Completed { thread_id, .. }
            | RunOutcome::Suspended { thread_id, .. }
            | RunOutcome::Failed { thread_id, .. } => thread_id,
        }
    }

    /// Convert into the final text, or the error a plain `Result` caller should see.
    pub fn into_result(self) -> Result<String, MaestroError> {
        match self {
            RunOutcome::Completed { response, .. } => Ok(response),
            RunOutcome::Suspended { thread_id, .. } => Err(MaestroError::Suspended { thread_id }),
            RunOutcome::Failed {
                execution_id,
                error,
                ..
            } => Err(error.to_error(execution_id)),
        }
    }
}
