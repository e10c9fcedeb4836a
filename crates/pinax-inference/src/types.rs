//! Gateway request and response types (OpenAI chat-completions dialect).

use serde::{Deserialize, Serialize};

use pinax_core::defaults::{INPUT_COST_PER_MTOK, OUTPUT_COST_PER_MTOK};

/// Request body for the chat-completions endpoint.
#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub response_format: ResponseFormat,
}

/// Response-format constraint; PINAX always requests a JSON object.
#[derive(Debug, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub format_type: &'static str,
}

impl ResponseFormat {
    pub fn json_object() -> Self {
        Self {
            format_type: "json_object",
        }
    }
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Response from the chat-completions endpoint.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

/// Single chat completion choice.
#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Token usage reported by the gateway, priced for cost accounting.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl Usage {
    /// Estimated request cost in USD at the configured per-million rates.
    pub fn cost_usd(&self) -> f64 {
        self.prompt_tokens as f64 / 1_000_000.0 * INPUT_COST_PER_MTOK
            + self.completion_tokens as f64 / 1_000_000.0 * OUTPUT_COST_PER_MTOK
    }

    /// Sum two usage blocks (chunk-level aggregation).
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Error envelope some gateways return on failure.
#[derive(Debug, Deserialize)]
pub struct GatewayErrorResponse {
    pub error: GatewayError,
}

#[derive(Debug, Deserialize)]
pub struct GatewayError {
    pub message: String,
}
