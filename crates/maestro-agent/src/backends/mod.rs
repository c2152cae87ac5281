pub mod claude;
pub mod echo;
pub mod openai;

use crate::config::{LlmProvider, ModelConfig};
use async_trait::async_trait;
use maestro_core::MaestroResult;
use std::sync::Arc;

pub use claude::ClaudeBackend;
pub use echo::EchoBackend;
pub use openai::OpenAiBackend;

/// Trait for LLM provider backends.
///
/// Each provider (Claude, OpenAI, Groq, etc.) implements this trait to handle
/// API communication. A worker issues one single-turn completion per prompt.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Single-turn completion of `prompt` under `system_prompt`.
    async fn complete(&self, system_prompt: &str, prompt: &str) -> MaestroResult<String>;
}

/// Build the backend for the configured provider.
pub fn backend_for(config: &ModelConfig) -> Arc<dyn LlmBackend> {
    match config.provider {
        LlmProvider::Claude => Arc::new(ClaudeBackend::new(config.clone())),
        LlmProvider::OpenAi | LlmProvider::OpenRouter | LlmProvider::Groq => {
            Arc::new(OpenAiBackend::new(config.clone()))
        }
        LlmProvider::Echo => Arc::new(EchoBackend),
    }
}
