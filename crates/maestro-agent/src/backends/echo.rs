use super::LlmBackend;
use async_trait::async_trait;
use maestro_core::MaestroResult;

/// Offline backend that answers with the prompt it was given.
///
/// Lets the CLI and the state machine run end to end without credentials.
pub struct EchoBackend;

#[async_trait]
impl LlmBackend for EchoBackend {
    async fn complete(&self, _system_prompt: &str, prompt: &str) -> MaestroResult<String> {
        Ok(prompt.to_string())
    }
}
