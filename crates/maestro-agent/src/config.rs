use maestro_core::{MaestroError, MaestroResult};
use serde::{Deserialize, Serialize};

/// Environment variable consulted when `api_key` is left empty.
pub const API_KEY_ENV: &str = "MAESTRO_API_KEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Claude,
    OpenAi,
    OpenRouter,
    /// Groq cloud inference, OpenAI-compatible API.
    Groq,
    /// Offline provider that answers with the prompt itself. No API key needed.
    Echo,
}

impl LlmProvider {
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, Self::Echo)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: LlmProvider,
    pub model_id: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Echo,
            model_id: "echo".to_string(),
            api_key: String::new(),
            api_base_url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl ModelConfig {
    pub fn new(provider: LlmProvider, model_id: impl Into<String>) -> Self {
        Self {
            provider,
            model_id: model_id.into(),
            ..Self::default()
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = key.into();
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    pub fn base_url(&self) -> &str {
        if let Some(url) = &self.api_base_url {
            url.trim_end_matches('/')
        } else {
            match self.provider {
                LlmProvider::Claude => "https://api.anthropic.com",
                LlmProvider::OpenAi => "https://api.openai.com",
                LlmProvider::OpenRouter => "https://openrouter.ai/api",
                LlmProvider::Groq => "https://api.groq.com/openai",
                LlmProvider::Echo => "local://echo",
            }
        }
    }

    /// Fill an empty `api_key` from [`API_KEY_ENV`].
    pub fn resolve_api_key(mut self) -> Self {
        if self.api_key.is_empty() {
            if let Ok(key) = std::env::var(API_KEY_ENV) {
                self.api_key = key;
            }
        }
        self
    }

    pub fn validate(&self) -> MaestroResult<()> {
        if self.model_id.trim().is_empty() {
            return Err(MaestroError::Config("model.model_id must not be empty".into()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(MaestroError::Config(format!(
                "model.temperature must be within [0, 2], got {}",
                self.temperature
            )));
        }
        if self.max_tokens == 0 {
            return Err(MaestroError::Config("model.max_tokens must be > 0".into()));
        }
        Ok(())
    }
}
