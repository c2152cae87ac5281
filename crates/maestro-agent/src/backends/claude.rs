use super::LlmBackend;
use crate::config::ModelConfig;
use async_trait::async_trait;
use maestro_core::{MaestroError, MaestroResult};

/// Claude (Anthropic) messages API backend.
pub struct ClaudeBackend {
    config: ModelConfig,
    http: reqwest::Client,
}

impl ClaudeBackend {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LlmBackend for ClaudeBackend {
    async fn complete(&self, system_prompt: &str, prompt: &str) -> MaestroResult<String> {
        let url = format!("{}/v1/messages", self.config.base_url());

        let mut body = serde_json::json!({
            "model": self.config.model_id,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "messages": [{ "role": "user", "content": prompt }],
        });

        if !system_prompt.is_empty() {
            body["system"] = serde_json::json!(system_prompt);
        }

        let resp = self
            .http
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| MaestroError::Http(e.to_string()))?;

        let status = resp.status();
        let resp_body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| MaestroError::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(MaestroError::Http(format!(
                "Claude API error {status}: {resp_body}"
            )));
        }

        parse_claude_response(&resp_body)
    }
}

/// Join the `text` blocks of a messages API response.
pub fn parse_claude_response(body: &serde_json::Value) -> MaestroResult<String> {
    let content = body["content"]
        .as_array()
        .ok_or_else(|| MaestroError::Http("Missing content in Claude response".into()))?;

    let text_parts: Vec<&str> = content
        .iter()
        .filter(|block| block["type"].as_str() == Some("text"))
        .filter_map(|block| block["text"].as_str())
        .collect();

    if text_parts.is_empty() {
        return Err(MaestroError::Http("Claude response contained no text".into()));
    }
    Ok(text_parts.join("\n"))
}
