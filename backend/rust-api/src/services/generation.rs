//! Opaque text-generation capability: "produce text given a prompt and
//! context", blocking or as a token stream.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt, TryStreamExt};
use serde_json::json;

use crate::config::Config;
use crate::error::CoreError;
use crate::models::chat::ChatMessage;
use crate::utils::stream::SseParser;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const COMPLETION_TIMEOUT_SECS: u64 = 180;

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
}

impl GenerationRequest {
    /// Single user-turn prompt, no system message.
    pub fn prompt(text: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            system: None,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: text.into(),
            }],
            max_tokens,
        }
    }
}

pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, CoreError>> + Send>>;

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, req: GenerationRequest) -> Result<String, CoreError>;

    /// Open a token stream for one turn. Dropping the returned stream
    /// closes the upstream connection (cooperative cancellation).
    async fn stream(&self, req: GenerationRequest) -> Result<TokenStream, CoreError>;
}

/// Anthropic Messages API client.
pub struct ClaudeGenerator {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl ClaudeGenerator {
    pub fn new(config: &Config) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(COMPLETION_TIMEOUT_SECS))
            .build()
            .map_err(|e| CoreError::UpstreamGeneration(e.to_string()))?;

        Ok(Self {
            client,
            api_url: config.generation_api_url.clone(),
            api_key: config.generation_api_key.clone(),
            model: config.generation_model.clone(),
        })
    }

    fn request_body(&self, req: &GenerationRequest, stream: bool) -> serde_json::Value {
        let mut body = json!({
            "model": self.model,
            "max_tokens": req.max_tokens,
            "messages": req.messages,
        });
        if let Some(system) = &req.system {
            body["system"] = json!(system);
        }
        if stream {
            body["stream"] = json!(true);
        }
        body
    }

    async fn send(
        &self,
        req: &GenerationRequest,
        stream: bool,
    ) -> Result<reqwest::Response, CoreError> {
        let url = format!("{}/v1/messages", self.api_url);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.request_body(req, stream))
            .send()
            .await
            .map_err(|e| CoreError::UpstreamGeneration(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(CoreError::UpstreamGeneration(format!(
                "generation API returned {}: {}",
                status, detail
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl TextGenerator for ClaudeGenerator {
    async fn complete(&self, req: GenerationRequest) -> Result<String, CoreError> {
        let response = self.send(&req, false).await?;
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CoreError::UpstreamGeneration(format!("invalid response body: {}", e)))?;

        body.pointer("/content/0/text")
            .and_then(|t| t.as_str())
            .map(|t| t.to_string())
            .ok_or_else(|| {
                CoreError::UpstreamGeneration("response carries no text content".to_string())
            })
    }

    async fn stream(&self, req: GenerationRequest) -> Result<TokenStream, CoreError> {
        let response = self.send(&req, true).await?;

        let mut parser = SseParser::new();
        let tokens = response
            .bytes_stream()
            .map_err(|e| CoreError::UpstreamGeneration(format!("stream transport error: {}", e)))
            .map_ok(move |chunk| {
                let items: Vec<Result<String, CoreError>> = parser
                    .push(&chunk)
                    .into_iter()
                    .filter_map(|payload| delta_text(&payload))
                    .collect();
                futures::stream::iter(items)
            })
            .try_flatten();

        Ok(Box::pin(tokens))
    }
}

/// Extract the text delta from one upstream event payload. Non-delta events
/// (message_start, ping, message_stop, ...) carry no text and are skipped.
fn delta_text(payload: &str) -> Option<Result<String, CoreError>> {
    let value: serde_json::Value = serde_json::from_str(payload).ok()?;
    match value.get("type").and_then(|t| t.as_str()) {
        Some("content_block_delta") => value
            .pointer("/delta/text")
            .and_then(|t| t.as_str())
            .map(|t| Ok(t.to_string())),
        Some("error") => {
            let message = value
                .pointer("/error/message")
                .and_then(|m| m.as_str())
                .unwrap_or("upstream error");
            Some(Err(CoreError::UpstreamGeneration(message.to_string())))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_text_extracts_token() {
        let payload = r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#;
        assert_eq!(delta_text(payload).unwrap().unwrap(), "Hi");
    }

    #[test]
    fn delta_text_skips_control_events() {
        assert!(delta_text(r#"{"type":"ping"}"#).is_none());
        assert!(delta_text(r#"{"type":"message_stop"}"#).is_none());
        assert!(delta_text("[DONE]").is_none());
    }

    #[test]
    fn delta_text_surfaces_upstream_error() {
        let payload = r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        match delta_text(payload) {
            Some(Err(CoreError::UpstreamGeneration(msg))) => assert_eq!(msg, "Overloaded"),
            other => panic!("expected upstream error, got {:?}", other.map(|r| r.is_ok())),
        }
    }

    #[test]
    fn prompt_builds_single_user_turn() {
        let req = GenerationRequest::prompt("hello", 1024);
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.messages[0].role, "user");
        assert!(req.system.is_none());
    }
}
