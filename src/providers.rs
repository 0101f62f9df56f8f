//! Provider Adapter: normalizes chat-completion calls across
//! three wire dialects into `(content, Usage, FinishReason)`, plus a
//! lightweight `ping()` used by the health prober.
//!
//! Class-inheritance for providers is replaced with polymorphism over a
//! single `{complete, ping}` interface: the core depends only on
//! `ProviderClient`, never on a concrete provider type.

use crate::error::RouterError;
use crate::models::{FinishReason, Message, MessageRole, Model, ProviderResponse, Usage};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

#[async_trait]
pub trait ProviderClient: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    async fn complete(&self, model: Model, messages: &[Message]) -> Result<ProviderResponse, RouterError>;

    /// Lightweight liveness probe used by the health prober.
    async fn ping(&self) -> bool;
}

/// A hosted endpoint serving a subset of models.
/// Every [`Model`] appears in exactly one provider's `models` set.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub models: HashSet<Model>,
}

/// Parses the `Retry-After` header (seconds form) a 429 response carries,
/// so the executor's rate-limit backoff honors what the provider actually
/// asked for instead of a fixed guess.
fn retry_after_secs(response: &reqwest::Response) -> Option<u64> {
    response.headers().get(reqwest::header::RETRY_AFTER)?.to_str().ok()?.trim().parse().ok()
}

fn map_role(role: MessageRole) -> &'static str {
    match role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
    }
}

// ---------------------------------------------------------------------
// Native dialect: Ollama-style /api/chat.
// ---------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct NativeChatRequest<'a> {
    model: &'a str,
    messages: Vec<NativeMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct NativeMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct NativeChatResponse {
    message: NativeResponseMessage,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
    done: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct NativeResponseMessage {
    content: String,
}

#[derive(Debug)]
pub struct NativeProvider {
    config: ProviderConfig,
    client: Client,
}

impl NativeProvider {
    pub fn new(config: ProviderConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { config, client }
    }
}

#[async_trait]
impl ProviderClient for NativeProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn complete(&self, model: Model, messages: &[Message]) -> Result<ProviderResponse, RouterError> {
        let url = format!("{}/api/chat", self.config.base_url.trim_end_matches('/'));
        let native_messages: Vec<NativeMessage> = messages
            .iter()
            .map(|m| NativeMessage {
                role: map_role(m.role),
                content: m.content.as_str(),
            })
            .collect();

        let request = NativeChatRequest {
            model: model.as_str(),
            messages: native_messages,
            stream: false,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RouterError::NetworkError(format!("{}: {e}", self.config.name)))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_secs(&response);
            let body = response.text().await.unwrap_or_default();
            return Err(RouterError::from_status(&self.config.name, status.as_u16(), &body, retry_after));
        }

        let data: NativeChatResponse = response
            .json()
            .await
            .map_err(|e| RouterError::ServerError(format!("invalid response from {}: {e}", self.config.name)))?;

        let prompt_tokens = data.prompt_eval_count.unwrap_or(0);
        let completion_tokens = data.eval_count.unwrap_or(0);

        Ok(ProviderResponse {
            content: data.message.content,
            usage: Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens.saturating_add(completion_tokens),
            },
            finish_reason: if data.done.unwrap_or(true) { FinishReason::Stop } else { FinishReason::Length },
        })
    }

    async fn ping(&self) -> bool {
        let url = format!("{}/api/tags", self.config.base_url.trim_end_matches('/'));
        matches!(self.client.get(&url).send().await, Ok(resp) if resp.status().is_success())
    }
}

// ---------------------------------------------------------------------
// OpenAI-compatible dialect: /v1/chat/completions.
// ---------------------------------------------------------------------

#[derive(Debug)]
pub struct OpenAiCompatProvider {
    config: ProviderConfig,
    client: Client,
}

impl OpenAiCompatProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self { config, client: Client::new() }
    }

    fn auth_header(&self) -> Option<String> {
        self.config.api_key.as_ref().map(|key| format!("Bearer {key}"))
    }
}

#[async_trait]
impl ProviderClient for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn complete(&self, model: Model, messages: &[Message]) -> Result<ProviderResponse, RouterError> {
        let url = format!("{}/v1/chat/completions", self.config.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": model.as_str(),
            "messages": messages.iter().map(|m| serde_json::json!({
                "role": map_role(m.role),
                "content": m.content,
            })).collect::<Vec<_>>(),
            "stream": false,
        });

        let mut req = self.client.post(&url).json(&body).timeout(self.config.timeout);
        if let Some(auth) = self.auth_header() {
            req = req.header("Authorization", auth);
        }

        let response = req
            .send()
            .await
            .map_err(|e| RouterError::NetworkError(format!("{}: {e}", self.config.name)))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_secs(&response);
            let text = response.text().await.unwrap_or_default();
            return Err(RouterError::from_status(&self.config.name, status.as_u16(), &text, retry_after));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RouterError::ServerError(format!("invalid response from {}: {e}", self.config.name)))?;

        let content = data["choices"][0]["message"]["content"].as_str().unwrap_or("").to_string();
        let finish_reason = match data["choices"][0]["finish_reason"].as_str() {
            Some("stop") => FinishReason::Stop,
            Some("length") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            _ => FinishReason::Stop,
        };
        let usage = data["usage"].as_object().map(|u| Usage {
            prompt_tokens: u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            completion_tokens: u.get("completion_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            total_tokens: u.get("total_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        }).unwrap_or_default();

        Ok(ProviderResponse { content, usage, finish_reason })
    }

    async fn ping(&self) -> bool {
        let url = format!("{}/v1/models", self.config.base_url.trim_end_matches('/'));
        matches!(self.client.get(&url).send().await, Ok(resp) if resp.status().is_success())
    }
}

// ---------------------------------------------------------------------
// Anthropic Messages-style dialect: /v1/messages, with `system` hoisted
// out of the message list and content expressed as blocks.
// ---------------------------------------------------------------------

#[derive(Debug)]
pub struct AnthropicCompatProvider {
    config: ProviderConfig,
    client: Client,
}

impl AnthropicCompatProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self { config, client: Client::new() }
    }
}

#[async_trait]
impl ProviderClient for AnthropicCompatProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn complete(&self, model: Model, messages: &[Message]) -> Result<ProviderResponse, RouterError> {
        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));

        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == MessageRole::System)
            .map(|m| m.content.as_str())
            .collect();
        let turns: Vec<serde_json::Value> = messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .map(|m| serde_json::json!({
                "role": map_role(m.role),
                "content": [{"type": "text", "text": m.content}],
            }))
            .collect();

        let mut body = serde_json::json!({
            "model": model.as_str(),
            "max_tokens": 4096,
            "messages": turns,
        });
        if !system.is_empty() {
            body["system"] = serde_json::Value::String(system.join("\n"));
        }

        let mut req = self.client.post(&url).json(&body).timeout(self.config.timeout);
        if let Some(key) = &self.config.api_key {
            req = req.header("x-api-key", key).header("anthropic-version", "2023-06-01");
        }

        let response = req
            .send()
            .await
            .map_err(|e| RouterError::NetworkError(format!("{}: {e}", self.config.name)))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_secs(&response);
            let text = response.text().await.unwrap_or_default();
            return Err(RouterError::from_status(&self.config.name, status.as_u16(), &text, retry_after));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RouterError::ServerError(format!("invalid response from {}: {e}", self.config.name)))?;

        let content = data["content"][0]["text"].as_str().unwrap_or("").to_string();
        let finish_reason = match data["stop_reason"].as_str() {
            Some("end_turn") | Some("stop_sequence") => FinishReason::Stop,
            Some("max_tokens") => FinishReason::Length,
            _ => FinishReason::Stop,
        };
        let usage = Usage {
            prompt_tokens: data["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: data["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
            total_tokens: (data["usage"]["input_tokens"].as_u64().unwrap_or(0)
                + data["usage"]["output_tokens"].as_u64().unwrap_or(0)) as u32,
        };

        Ok(ProviderResponse { content, usage, finish_reason })
    }

    async fn ping(&self) -> bool {
        // Anthropic has no dedicated health endpoint; a 4xx from a HEAD
        // to the base URL still indicates the service is reachable.
        matches!(self.client.head(&self.config.base_url).send().await, Ok(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_mapping_is_total() {
        assert_eq!(map_role(MessageRole::System), "system");
        assert_eq!(map_role(MessageRole::User), "user");
        assert_eq!(map_role(MessageRole::Assistant), "assistant");
    }
}
