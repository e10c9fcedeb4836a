//! OpenAI-compatible model gateway client (DeepInfra in production).

use std::time::Duration;

use tracing::debug;

use pinax_core::defaults::{
    DEEPINFRA_URL, GATEWAY_TIMEOUT_SECS, MODEL_COMPLETION_TOKENS, MODEL_NAME, MODEL_TEMPERATURE,
};
use pinax_core::{Error, Result};

use crate::types::*;

/// Configuration for the model gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL of the OpenAI-compatible API.
    pub base_url: String,
    /// Bearer token.
    pub api_key: String,
    /// Generation model name.
    pub model: String,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
}

impl GatewayConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: MODEL_NAME.to_string(),
            timeout_seconds: GATEWAY_TIMEOUT_SECS,
        }
    }

    /// Create from environment variables.
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `DEEPINFRA_API_KEY` | (required) | Bearer token |
    /// | `DEEPINFRA_BASE_URL` | DeepInfra OpenAI endpoint | API base URL |
    /// | `MODEL_NAME` | Meta-Llama-3.1-8B-Instruct | Generation model |
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("DEEPINFRA_API_KEY")
            .map_err(|_| Error::Config("DEEPINFRA_API_KEY is not set".to_string()))?;
        let base_url =
            std::env::var("DEEPINFRA_BASE_URL").unwrap_or_else(|_| DEEPINFRA_URL.to_string());
        let model = std::env::var("MODEL_NAME").unwrap_or_else(|_| MODEL_NAME.to_string());
        Ok(Self {
            base_url,
            api_key,
            model,
            timeout_seconds: GATEWAY_TIMEOUT_SECS,
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

/// Client for the chat-completions endpoint.
#[derive(Clone)]
pub struct ModelGateway {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl ModelGateway {
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// One extraction call: system + user messages, JSON-object response
    /// constraint, low temperature. Returns the raw content string and the
    /// billed usage.
    pub async fn complete_json(&self, system: &str, user: &str) -> Result<(String, Usage)> {
        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            temperature: MODEL_TEMPERATURE,
            max_tokens: MODEL_COMPLETION_TOKENS,
            response_format: ResponseFormat::json_object(),
        };

        debug!(
            subsystem = "inference",
            component = "gateway",
            op = "complete_json",
            model = %self.config.model,
            prompt_len = system.len() + user.len(),
            "Calling model gateway"
        );

        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Llm {
                status: 0,
                body: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<GatewayErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(Error::Llm {
                status: status.as_u16(),
                body: message,
            });
        }

        let completion: ChatCompletionResponse =
            response.json().await.map_err(|e| Error::Llm {
                status: status.as_u16(),
                body: format!("unreadable completion body: {e}"),
            })?;

        let usage = completion.usage.unwrap_or_default();
        let content = completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(Error::Llm {
                status: status.as_u16(),
                body: "empty choices".to_string(),
            })?;

        debug!(
            subsystem = "inference",
            component = "gateway",
            op = "complete_json",
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            cost_usd = usage.cost_usd(),
            "Gateway call complete"
        );
        Ok((content, usage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = GatewayConfig::new("http://gw.example/v1/openai", "key");
        assert_eq!(config.model, MODEL_NAME);
        assert_eq!(config.timeout_seconds, GATEWAY_TIMEOUT_SECS);

        let config = config.with_model("other/model");
        assert_eq!(config.model, "other/model");
    }
}
