//! Core types and error definitions for the Maestro routing engine.
//!
//! This crate provides the foundational types shared across all Maestro crates:
//! the error taxonomy, the collaborator traits a host must implement to plug
//! workers into the engine, and the checkpoint primitives used for
//! human-in-the-loop suspension.
//!
//! # Main types
//!
//! - [`MaestroError`]: Unified error enum for loading, routing and execution failures.
//! - [`MaestroResult`]: Convenience alias for `Result<T, MaestroError>`.
//! - [`WorkerDescriptor`]: Static, immutable configuration of one worker.
//! - [`LiveWorker`] / [`WorkerFactory`]: Instantiation and invocation of workers.
//! - [`RosterProvider`]: Source of the known worker roster.
//! - [`CheckpointChannel`]: Suspend/resume primitive for human checkpoints.

/// Checkpoint types for human-in-the-loop suspension.
pub mod checkpoint;
/// Worker descriptors and collaborator traits.
pub mod worker;

pub use checkpoint::{
    CheckpointChannel, CheckpointKind, CheckpointRequest, CheckpointResponse, Resumption,
};
pub use worker::{LiveWorker, RosterProvider, WorkerDescriptor, WorkerFactory};

use uuid::Uuid;

// --- Error types ---

/// Top-level error type for the Maestro engine.
///
/// The first five variants form the failure taxonomy of the routing engine;
/// the rest are infrastructure errors from configuration, persistence and I/O.
#[derive(Debug, thiserror::Error)]
pub enum MaestroError {
    /// The worker name is absent from the roster.
    #[error("Worker not found: {0}")]
    NotFound(String),

    /// Instantiating the live worker failed.
    #[error("Worker '{worker}' failed to initialize: {reason}")]
    InitFailed {
        /// Worker name.
        worker: String,
        /// Failure reported by the instantiation provider.
        reason: String,
    },

    /// A worker invocation exceeded its time budget.
    #[error("Worker '{worker}' timed out after {seconds}s")]
    ExecutionTimeout {
        /// Worker name.
        worker: String,
        /// The timeout that was exceeded, in seconds.
        seconds: u64,
    },

    /// A worker invocation returned an error.
    #[error("Worker '{worker}' failed: {reason}")]
    ExecutionError {
        /// Worker name.
        worker: String,
        /// Failure reported by the worker.
        reason: String,
    },

    /// The execution monitor force-failed a request that ran too long.
    #[error("Execution {execution_id} exceeded the {seconds}s ceiling")]
    StaleExecution {
        /// The execution that was cancelled.
        execution_id: Uuid,
        /// The ceiling that was exceeded, in seconds.
        seconds: u64,
    },

    /// The request is parked at a checkpoint and must be resumed by thread id.
    #[error("Execution suspended at a checkpoint (thread {thread_id})")]
    Suspended {
        /// Correlation key to pass to `resume`.
        thread_id: String,
    },

    /// An error persisting or restoring checkpointed state.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An error from an outbound HTTP request (e.g. LLM API call).
    #[error("HTTP error: {0}")]
    Http(String),

    /// An internal orchestration error.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MaestroError {
    /// The worker this error is attributed to, if any.
    pub fn worker(&self) -> Option<&str> {
        match self {
            MaestroError::NotFound(worker) => Some(worker),
            MaestroError::InitFailed { worker, .. }
            | MaestroError::ExecutionTimeout { worker, .. }
            | MaestroError::ExecutionError { worker, .. } => Some(worker),
            _ => None,
        }
    }
}

/// A convenience `Result` alias using [`MaestroError`].
pub type MaestroResult<T> = Result<T, MaestroError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MaestroError::InitFailed {
            worker: "writer".into(),
            reason: "model warm-up failed".into(),
        };
        assert_eq!(
            err.to_string(),
            "Worker 'writer' failed to initialize: model warm-up failed"
        );

        let err = MaestroError::ExecutionTimeout {
            worker: "reviewer".into(),
            seconds: 300,
        };
        assert_eq!(err.to_string(), "Worker 'reviewer' timed out after 300s");
    }

    #[test]
    fn test_error_worker_attribution() {
        assert_eq!(MaestroError::NotFound("ghost".into()).worker(), Some("ghost"));
        assert_eq!(
            MaestroError::ExecutionError {
                worker: "coder".into(),
                reason: "boom".into()
            }
            .worker(),
            Some("coder")
        );
        assert_eq!(MaestroError::Config("bad".into()).worker(), None);
    }

    #[test]
    fn test_json_error_from() {
        let parse: Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: MaestroError = parse.unwrap_err().into();
        assert!(err.to_string().starts_with("JSON error:"));
    }
}
