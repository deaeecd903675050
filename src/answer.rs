//! Answering questions from the stored knowledge.
//!
//! [`AnswerEngine::ask`] is a single-shot pipeline:
//!
//! ```text
//! knowledge empty? ──yes──▶ NoKnowledgeAvailable
//!        │ no
//!        ▼
//!   build prompt ─▶ complete() ──transport/timeout──▶ Transport
//!                       │ JSON body
//!                       ▼
//!              classify_response()
//!        ├─ "error" present ─────────▶ Upstream(payload)
//!        ├─ no "choices" array ──────▶ Upstream(whole body)
//!        ├─ choices empty ───────────▶ EmptyResponse
//!        ├─ first choice malformed ──▶ MalformedResponse(choice)
//!        ├─ content blank ───────────▶ EmptyResponse
//!        └─ otherwise ───────────────▶ Answer
//! ```
//!
//! There are no retries and no caching; identical questions produce
//! identical, independent requests.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::completion::{ChatMessage, CompletionClient, CompletionRequest};
use crate::config::Config;
use crate::models::{Answer, KnowledgeText};

/// Per-request prompt and sampling parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Emitted verbatim by the model when the knowledge does not contain the answer.
    pub fallback_phrase: String,
    pub max_sentences: u32,
}

impl PromptConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.completion.model.clone(),
            max_tokens: config.completion.max_tokens,
            temperature: config.completion.temperature,
            fallback_phrase: config.prompt.fallback_phrase.clone(),
            max_sentences: config.prompt.max_sentences,
        }
    }
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[derive(Debug, Error)]
pub enum QaError {
    #[error("no documents have been ingested yet")]
    NoKnowledgeAvailable,
    #[error("{0}")]
    Transport(String),
    #[error("completion service returned an error: {0}")]
    Upstream(Value),
    #[error("completion service returned no answer")]
    EmptyResponse,
    #[error("completion response had an unexpected shape: {0}")]
    MalformedResponse(Value),
}

impl QaError {
    /// Stable machine-readable code used by the HTTP API.
    pub fn code(&self) -> &'static str {
        match self {
            QaError::NoKnowledgeAvailable => "no_knowledge",
            QaError::Transport(_) => "transport_error",
            QaError::Upstream(_) => "upstream_error",
            QaError::EmptyResponse => "empty_response",
            QaError::MalformedResponse(_) => "malformed_response",
        }
    }

    /// Text suitable for showing to the person who asked.
    pub fn user_message(&self) -> String {
        match self {
            QaError::NoKnowledgeAvailable => {
                "No documents have been uploaded yet. Please wait for an admin to add one."
                    .to_string()
            }
            QaError::Transport(_) => {
                "The answer service could not be reached. Please try again.".to_string()
            }
            QaError::Upstream(payload) => format!("The answer service reported an error: {}", payload),
            QaError::EmptyResponse => "The answer service returned an empty reply.".to_string(),
            QaError::MalformedResponse(payload) => {
                format!("The answer service returned an unexpected reply: {}", payload)
            }
        }
    }

    /// Raw diagnostic payload, when the collaborator supplied one.
    pub fn payload(&self) -> Option<&Value> {
        match self {
            QaError::Upstream(v) | QaError::MalformedResponse(v) => Some(v),
            _ => None,
        }
    }
}

pub struct AnswerEngine {
    client: Arc<dyn CompletionClient>,
    timeout: Duration,
}

impl AnswerEngine {
    pub fn new(client: Arc<dyn CompletionClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Answers `question` using only `knowledge`.
    ///
    /// The caller guarantees `question` is non-empty. Empty knowledge
    /// short-circuits without contacting the collaborator.
    pub async fn ask(
        &self,
        question: &str,
        knowledge: &KnowledgeText,
        config: &PromptConfig,
    ) -> Result<Answer, QaError> {
        if knowledge.is_empty() {
            return Err(QaError::NoKnowledgeAvailable);
        }

        let request = build_request(question, &knowledge.content, config);
        let body = match tokio::time::timeout(self.timeout, self.client.complete(&request)).await {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => {
                warn!(error = %e, "completion transport failure");
                return Err(QaError::Transport(e.to_string()));
            }
            Err(_) => {
                warn!(timeout = ?self.timeout, "completion request timed out");
                return Err(QaError::Transport(format!(
                    "completion request timed out after {:?}",
                    self.timeout
                )));
            }
        };

        let result = classify_response(&body);
        match &result {
            Ok(answer) => info!(chars = answer.text.chars().count(), "answered question"),
            Err(e) => warn!(code = e.code(), "completion did not yield an answer"),
        }
        result
    }
}

/// Builds the system instruction for the given settings.
pub fn system_prompt(config: &PromptConfig) -> String {
    format!(
        "You answer questions using only the document text provided by the user. \
         Do not use outside knowledge. Reply in 1 to {} sentences. \
         If the answer cannot be found in the document text, reply with exactly: {}",
        config.max_sentences, config.fallback_phrase
    )
}

/// Builds the user message: knowledge first, question last, with labelled delimiters.
pub fn user_prompt(question: &str, knowledge: &str) -> String {
    format!(
        "=== DOCUMENT TEXT START ===\n{}\n=== DOCUMENT TEXT END ===\n\nQuestion: {}",
        knowledge, question
    )
}

pub fn build_request(question: &str, knowledge: &str, config: &PromptConfig) -> CompletionRequest {
    CompletionRequest {
        model: config.model.clone(),
        messages: vec![
            ChatMessage::system(system_prompt(config)),
            ChatMessage::user(user_prompt(question, knowledge)),
        ],
        max_tokens: config.max_tokens,
        temperature: config.temperature,
    }
}

/// Interprets a chat-completion response body.
pub fn classify_response(body: &Value) -> Result<Answer, QaError> {
    if let Some(error) = body.get("error") {
        if !error.is_null() {
            return Err(QaError::Upstream(error.clone()));
        }
    }

    let Some(choices) = body.get("choices").and_then(Value::as_array) else {
        return Err(QaError::Upstream(body.clone()));
    };

    let Some(first) = choices.first() else {
        return Err(QaError::EmptyResponse);
    };

    let Some(content) = first
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
    else {
        return Err(QaError::MalformedResponse(first.clone()));
    };

    let text = content.trim();
    if text.is_empty() {
        return Err(QaError::EmptyResponse);
    }
    Ok(Answer::new(text))
}
