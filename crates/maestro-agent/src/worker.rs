use crate::backends::{backend_for, LlmBackend};
use crate::config::ModelConfig;
use async_trait::async_trait;
use maestro_core::{LiveWorker, MaestroError, MaestroResult, WorkerDescriptor, WorkerFactory};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// A worker answering prompts through an LLM backend under a fixed system prompt.
pub struct LlmWorker {
    name: String,
    system_prompt: String,
    backend: Arc<dyn LlmBackend>,
}

impl LlmWorker {
    pub fn new(descriptor: &WorkerDescriptor, backend: Arc<dyn LlmBackend>) -> Self {
        Self {
            name: descriptor.name.clone(),
            system_prompt: descriptor.system_prompt(),
            backend,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }
}

#[async_trait]
impl LiveWorker for LlmWorker {
    async fn run(&self, prompt: &str) -> MaestroResult<String> {
        let start = Instant::now();
        let result = self.backend.complete(&self.system_prompt, prompt).await;
        match &result {
            Ok(text) => debug!(
                worker = %self.name,
                chars = text.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Completion received"
            ),
            Err(e) => warn!(worker = %self.name, error = %e, "Completion failed"),
        }
        result
    }
}

/// Builds [`LlmWorker`]s that share one model configuration.
pub struct LlmWorkerFactory {
    config: ModelConfig,
    backend: Option<Arc<dyn LlmBackend>>,
}

impl LlmWorkerFactory {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            backend: None,
        }
    }

    /// Use a prebuilt backend instead of the one selected by the provider.
    pub fn with_backend(mut self, backend: Arc<dyn LlmBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }
}

#[async_trait]
impl WorkerFactory for LlmWorkerFactory {
    async fn instantiate(&self, descriptor: &WorkerDescriptor) -> MaestroResult<Arc<dyn LiveWorker>> {
        let init_failed = |reason: String| MaestroError::InitFailed {
            worker: descriptor.name.clone(),
            reason,
        };

        self.config.validate().map_err(|e| init_failed(e.to_string()))?;
        if self.config.provider.requires_api_key() && self.config.api_key.trim().is_empty() {
            return Err(init_failed(format!(
                "no API key configured for provider {:?}",
                self.config.provider
            )));
        }

        let backend = match &self.backend {
            Some(backend) => Arc::clone(backend),
            None => backend_for(&self.config),
        };

        info!(
            worker = %descriptor.name,
            provider = ?self.config.provider,
            model = %self.config.model_id,
            tools = descriptor.tools.len(),
            "Worker instantiated"
        );
        Ok(Arc::new(LlmWorker::new(descriptor, backend)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::LlmProvider;

    #[tokio::test]
    async fn test_echo_worker_answers_prompt() {
        let factory = LlmWorkerFactory::new(ModelConfig::default());
        let descriptor =
            WorkerDescriptor::new("writer", "You write.").with_instructions("Be concise.");
        let worker = factory.instantiate(&descriptor).await.unwrap();
        assert_eq!(worker.run("draft a haiku").await.unwrap(), "draft a haiku");
    }

    #[tokio::test]
    async fn test_missing_key_fails_init() {
        let factory = LlmWorkerFactory::new(ModelConfig::new(LlmProvider::Claude, "m"));
        let err = factory
            .instantiate(&WorkerDescriptor::new("writer", "You write."))
            .await
            .err()
            .unwrap();
        match err {
            MaestroError::InitFailed { worker, reason } => {
                assert_eq!(worker, "writer");
                assert!(reason.contains("API key"));
            }
            other => panic!("expected InitFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_config_fails_init() {
        let mut config = ModelConfig::default();
        config.max_tokens = 0;
        let factory = LlmWorkerFactory::new(config);
        let err = factory
            .instantiate(&WorkerDescriptor::new("writer", "You write."))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, MaestroError::InitFailed { .. }));
    }

    #[test]
    fn test_system_prompt_combines_role_and_instructions() {
        let descriptor =
            WorkerDescriptor::new("writer", "You write.").with_instructions("Be concise.");
        let worker = LlmWorker::new(&descriptor, Arc::new(crate::backends::EchoBackend));
        assert_eq!(worker.name(), "writer");
        assert_eq!(worker.system_prompt(), "You write.\n\nBe concise.");
    }
}
