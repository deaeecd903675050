//! Wiring from [`Config`] to the running components.
//!
//! Both shells (the terminal REPL and the HTTP server) build one [`App`] at
//! startup and share it. Construction is where fatal misconfiguration is
//! caught: a missing completion API key or admin secret stops the process
//! before any question is accepted.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::admin::AdminGate;
use crate::answer::{AnswerEngine, PromptConfig, QaError};
use crate::completion::{CompletionClient, HttpCompletionClient};
use crate::config::{BackendKind, Config};
use crate::conversation::ConversationLog;
use crate::extract::FormatExtractor;
use crate::models::Answer;
use crate::store::{FileBackend, KnowledgeBackend, KnowledgeStore, SqliteBackend};

pub struct App {
    pub config: Arc<Config>,
    pub store: Arc<KnowledgeStore>,
    pub engine: Arc<AnswerEngine>,
    pub gate: Arc<AdminGate>,
    pub log: Arc<ConversationLog>,
    pub prompt: PromptConfig,
}

impl App {
    /// Builds the app against the configured remote completion endpoint.
    pub async fn from_config(config: Config) -> Result<Self> {
        let api_key = config.completion.api_key()?;
        let client = HttpCompletionClient::new(
            config.completion.endpoint.clone(),
            api_key,
            config.completion.timeout(),
        )?;
        Self::with_client(config, Arc::new(client)).await
    }

    /// Builds the app with an explicit completion client.
    pub async fn with_client(config: Config, client: Arc<dyn CompletionClient>) -> Result<Self> {
        let secret = config.admin.resolve_secret()?;
        let gate = AdminGate::new(config.admin.mode, config.admin.policy, secret);

        let backend: Arc<dyn KnowledgeBackend> = match config.store.backend {
            BackendKind::File => Arc::new(FileBackend::new(config.store.path.clone())),
            BackendKind::Sqlite => Arc::new(SqliteBackend::open(&config.store.path).await?),
        };
        let mut store = KnowledgeStore::new(
            backend,
            Arc::new(FormatExtractor),
            config.store.character_limit,
        );
        if let Some(dir) = &config.store.uploads_dir {
            store = store.with_uploads_dir(dir.clone());
        }
        let knowledge = store.reload().await;
        info!(
            chars = knowledge.char_len(),
            documents = knowledge.source_document_names.len(),
            "knowledge loaded"
        );

        let log = match &config.conversation.path {
            Some(path) => ConversationLog::open(path)?,
            None => ConversationLog::in_memory(),
        };

        Ok(Self {
            engine: Arc::new(AnswerEngine::new(client, config.completion.timeout())),
            prompt: PromptConfig::from_config(&config),
            store: Arc::new(store),
            gate: Arc::new(gate),
            log: Arc::new(log),
            config: Arc::new(config),
        })
    }

    /// Answers against the current knowledge snapshot and records the exchange.
    pub async fn ask(&self, question: &str) -> Result<Answer, QaError> {
        let knowledge = self.store.snapshot();
        let answer = self.engine.ask(question, &knowledge, &self.prompt).await?;
        if let Err(e) = self.log.append(question, &answer.text) {
            warn!(error = %format!("{:#}", e), "could not record conversation entry");
        }
        Ok(answer)
    }
}
