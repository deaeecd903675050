//! Chat-completion collaborator.
//!
//! The answer engine talks to the remote model through [`CompletionClient`],
//! which returns the raw JSON body. Interpreting that body (error object,
//! empty choices, odd shapes) is the answer engine's job; this module only
//! distinguishes "we got a JSON document back" from "we did not".
//!
//! [`HttpCompletionClient`] speaks the OpenAI-compatible
//! `POST /chat/completions` protocol used by OpenRouter and OpenAI:
//!
//! ```json
//! {
//!   "model": "meta-llama/llama-3.3-70b-instruct",
//!   "messages": [
//!     { "role": "system", "content": "..." },
//!     { "role": "user", "content": "..." }
//!   ],
//!   "max_tokens": 150,
//!   "temperature": 0.1
//! }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Serialize, PartialEq)]
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

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// The request never produced a JSON body.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Sends one request and returns the parsed response body.
    async fn complete(&self, request: &CompletionRequest) -> Result<Value, TransportError>;
}

pub struct HttpCompletionClient {
    endpoint: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpCompletionClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            client,
        })
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Value, TransportError> {
        debug!(endpoint = %self.endpoint, model = %request.model, "dispatching completion request");

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError(format!("completion request timed out: {}", e))
                } else {
                    TransportError(format!("completion request failed: {}", e))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError(format!("failed to read completion response: {}", e)))?;

        // Non-2xx bodies that parse as JSON carry the provider's own error object.
        serde_json::from_str(&body).map_err(|_| {
            let excerpt: String = body.chars().take(200).collect();
            TransportError(format!(
                "completion service returned {} with unparseable body: {}",
                status, excerpt
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_to_chat_completion_shape() {
        let request = CompletionRequest {
            model: "m".to_string(),
            messages: vec![ChatMessage::system("s"), ChatMessage::user("u")],
            max_tokens: 80,
            temperature: 0.0,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "m");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["messages"][1]["content"], "u");
        assert_eq!(json["max_tokens"], 80);
        assert_eq!(json["temperature"], 0.0);
    }

    #[tokio::test]
    async fn connection_refused_is_transport_error() {
        // Port 9 (discard) on localhost is not listening in test environments.
        let client =
            HttpCompletionClient::new("http://127.0.0.1:9/v1/chat/completions", "k", Duration::from_secs(2))
                .unwrap();
        let request = CompletionRequest {
            model: "m".to_string(),
            messages: vec![ChatMessage::user("hi")],
            max_tokens: 10,
            temperature: 0.0,
        };
        assert!(client.complete(&request).await.is_err());
    }
}
