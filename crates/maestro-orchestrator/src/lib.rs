//! Routing and orchestration engine for teams of LLM-backed workers.
//!
//! A request enters the [`Orchestrator`] at the director stage, is routed by
//! the [`RoutingOptimizer`] to the best-matching specialist, executed through a
//! lazily loaded [`WorkerHandle`], and checked with the human before it
//! completes. Results from several specialists are merged by a synthesis stage.
//!
//! # Main types
//!
//! - [`Orchestrator`]: The director/specialist/synthesis state machine with human checkpoints.
//! - [`WorkerLoader`]: Lazy, single-initialization worker cache with per-name locks.
//! - [`RoutingOptimizer`]: Heuristic worker scoring and selection.
//! - [`CapabilityIndex`]: Keyword-derived worker capabilities, cached per worker.
//! - [`ExecutionMonitor`]: Stale-execution sweeper and execution summaries.
//! - [`CheckpointStore`]: Persistence of suspended orchestration state.

/// Capability patterns and the per-worker capability cache.
pub mod capability;
/// Checkpoint stores and in-process checkpoint channels.
pub mod checkpoint;
/// Orchestrator and routing configuration.
pub mod config;
/// The orchestration state machine.
pub mod engine;
/// Lazy worker loading and worker handles.
pub mod loader;
/// In-flight execution tracking.
pub mod monitor;
/// Default worker profiles.
pub mod profiles;
/// In-memory roster provider.
pub mod roster;
/// Task analysis and worker selection.
pub mod routing;
/// Shared orchestration types (Stage, Capability, RoutingDecision, etc.).
pub mod types;

pub use capability::{default_patterns, CapabilityIndex, CapabilityPattern};
pub use checkpoint::{
    CheckpointStore, DetachedChannel, FileCheckpointStore, MemoryCheckpointStore, ScriptedChannel,
};
pub use config::{OrchestratorConfig, RoutingConfig};
pub use engine::{ExecutionMetrics, Orchestrator};
pub use loader::{LoaderMetrics, WorkerHandle, WorkerLoader, WorkerSnapshot};
pub use monitor::{ExecutionMonitor, ExecutionSummary};
pub use profiles::default_roster;
pub use roster::StaticRoster;
pub use routing::{RoutingMetrics, RoutingOptimizer};
pub use types::{
    Capability, Complexity, ErrorContext, ErrorKind, OrchestrationState, RoutingDecision,
    RoutingStrategy, RunOutcome, Stage, TaskAnalysis, Verdict, WorkerStatus,
};
