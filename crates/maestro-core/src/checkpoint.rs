//! Checkpoint types for human-in-the-loop (HITL) suspension.
//!
//! A checkpoint is a point where a request must stop and wait for a human:
//! either for the initial request text or for a verdict on a worker's result.
//! These types live in `maestro-core` so that consoles, gateways and the
//! orchestrator can share them without depending on each other.

use crate::MaestroResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a checkpoint is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointKind {
    /// The director has no request text yet.
    Input,
    /// A specialist answered; the human decides whether more work is needed.
    Satisfaction,
}

impl std::fmt::Display for CheckpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckpointKind::Input => write!(f, "input"),
            CheckpointKind::Satisfaction => write!(f, "satisfaction"),
        }
    }
}

/// Payload presented to a human when execution suspends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRequest {
    pub thread_id: String,
    pub execution_id: Uuid,
    pub kind: CheckpointKind,
    /// Question shown to the human.
    pub prompt: String,
    /// Material the human needs to answer (e.g. the worker's result).
    #[serde(default)]
    pub context: String,
}

/// The human's answer to a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointResponse {
    pub text: String,
    pub responder: String,
}

impl CheckpointResponse {
    /// A response with the given text from an anonymous responder.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            responder: "human".to_string(),
        }
    }
}

/// Outcome of suspending at a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resumption {
    /// The answer is available now; execution continues in place.
    Resume(CheckpointResponse),
    /// No answer yet. The state is already persisted and the caller resumes
    /// later by thread id.
    Detach,
}

/// Channel through which checkpoints are presented and answered.
///
/// Implementations can be terminal prompts, in-memory fakes, or a durable
/// substrate that always detaches and resumes on a later call.
#[async_trait]
pub trait CheckpointChannel: Send + Sync {
    /// Suspend on `request` and return the answer or a detach signal.
    async fn suspend(&self, request: CheckpointRequest) -> MaestroResult<Resumption>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_kind_serialization() {
        let json = serde_json::to_string(&CheckpointKind::Satisfaction).unwrap();
        assert_eq!(json, "\"satisfaction\"");
        assert_eq!(CheckpointKind::Input.to_string(), "input");
    }

    #[test]
    fn test_request_context_defaults_empty() {
        let id = Uuid::new_v4();
        let request: CheckpointRequest = serde_json::from_value(serde_json::json!({
            "thread_id": "t-1",
            "execution_id": id,
            "kind": "input",
            "prompt": "What do you need?"
        }))
        .unwrap();
        assert_eq!(request.kind, CheckpointKind::Input);
        assert!(request.context.is_empty());
        assert_eq!(request.execution_id, id);
    }

    #[test]
    fn test_response_new_uses_default_responder() {
        let response = CheckpointResponse::new("satisfied");
        assert_eq!(response.text, "satisfied");
        assert_eq!(response.responder, "human");
    }
}
