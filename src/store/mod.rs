//! The knowledge store: the one piece of state docqa persists.
//!
//! [`KnowledgeStore`] owns the current [`KnowledgeText`]. It is replaced
//! wholesale by [`ingest`](KnowledgeStore::ingest) and read by everyone else
//! through cheap [`snapshot`](KnowledgeStore::snapshot)s. Durable storage is a
//! pluggable [`KnowledgeBackend`]:
//!
//! | Backend | Artifact |
//! |---------|----------|
//! | [`FileBackend`] | one JSON file, replaced by atomic rename |
//! | [`SqliteBackend`] | one row, replaced inside a transaction |
//! | [`MemoryBackend`] | process memory (tests) |
//!
//! # Consistency
//!
//! Ingests are serialized by an async mutex. The in-memory snapshot is
//! swapped only after the backend write succeeds, so a failed ingest leaves
//! both the artifact and the snapshot at their prior value.

pub mod file;
pub mod memory;
pub mod sqlite;

pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::extract::TextExtractor;
use crate::models::{Document, KnowledgeText};

/// Separator placed between the texts of documents uploaded together.
pub const DOCUMENT_SEPARATOR: &str = "\n\n";

/// Durable storage for the single knowledge artifact.
///
/// `save` must replace the artifact atomically: a concurrent `load` sees
/// either the previous or the new value.
#[async_trait]
pub trait KnowledgeBackend: Send + Sync {
    /// Returns `None` when nothing has been saved yet.
    async fn load(&self) -> Result<Option<KnowledgeText>>;

    async fn save(&self, knowledge: &KnowledgeText) -> Result<()>;
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to persist knowledge: {0:#}")]
    Persistence(anyhow::Error),
    #[error("document extraction aborted: {0}")]
    Extraction(String),
}

pub struct KnowledgeStore {
    backend: Arc<dyn KnowledgeBackend>,
    extractor: Arc<dyn TextExtractor>,
    character_limit: usize,
    uploads_dir: Option<PathBuf>,
    current: RwLock<Arc<KnowledgeText>>,
    ingest_lock: Mutex<()>,
}

impl KnowledgeStore {
    pub fn new(
        backend: Arc<dyn KnowledgeBackend>,
        extractor: Arc<dyn TextExtractor>,
        character_limit: usize,
    ) -> Self {
        Self {
            backend,
            extractor,
            character_limit,
            uploads_dir: None,
            current: RwLock::new(Arc::new(KnowledgeText::empty(character_limit))),
            ingest_lock: Mutex::new(()),
        }
    }

    /// Keeps a copy of every raw upload under `dir`, named by content hash.
    pub fn with_uploads_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.uploads_dir = Some(dir.into());
        self
    }

    pub fn character_limit(&self) -> usize {
        self.character_limit
    }

    /// Reads the durable artifact.
    ///
    /// Never fails: a missing artifact is the normal first-run state, and an
    /// unreadable one is logged and treated the same way. An artifact stored
    /// under a larger limit is cut to the current one.
    pub async fn load(&self) -> KnowledgeText {
        match self.backend.load().await {
            Ok(Some(mut knowledge)) => {
                let stored = knowledge.char_len();
                if stored > self.character_limit {
                    warn!(
                        stored,
                        limit = self.character_limit,
                        "stored knowledge exceeds the character limit; truncating"
                    );
                    knowledge.content =
                        truncate_chars(&knowledge.content, self.character_limit).to_string();
                }
                knowledge.character_limit = self.character_limit;
                knowledge
            }
            Ok(None) => KnowledgeText::empty(self.character_limit),
            Err(e) => {
                warn!(error = %format!("{:#}", e), "could not read stored knowledge; starting empty");
                KnowledgeText::empty(self.character_limit)
            }
        }
    }

    /// Refreshes the in-memory snapshot from durable storage.
    pub async fn reload(&self) -> Arc<KnowledgeText> {
        let _guard = self.ingest_lock.lock().await;
        let knowledge = Arc::new(self.load().await);
        self.replace_snapshot(knowledge.clone());
        knowledge
    }

    /// The current knowledge, as of the last successful ingest or reload.
    pub fn snapshot(&self) -> Arc<KnowledgeText> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replaces the knowledge with the text of `documents`.
    ///
    /// Documents are extracted in order, joined with [`DOCUMENT_SEPARATOR`]
    /// and cut to the character limit before a single durable write.
    pub async fn ingest(&self, documents: &[Document]) -> Result<KnowledgeText, StoreError> {
        let _guard = self.ingest_lock.lock().await;

        // PDF parsing is CPU-bound; keep it off the async workers.
        let extractor = self.extractor.clone();
        let owned = documents.to_vec();
        let texts: Vec<String> = tokio::task::spawn_blocking(move || {
            owned
                .iter()
                .map(|doc| {
                    let text = extractor.extract(doc);
                    if text.is_empty() {
                        warn!(document = %doc.name, "no text extracted");
                    }
                    text
                })
                .collect()
        })
        .await
        .map_err(|e| StoreError::Extraction(e.to_string()))?;

        if let Some(dir) = &self.uploads_dir {
            for doc in documents {
                if let Err(e) = archive_upload(dir, doc) {
                    warn!(document = %doc.name, error = %format!("{:#}", e), "could not archive upload");
                }
            }
        }

        let combined = combine_texts(&texts);
        let content = truncate_chars(&combined, self.character_limit).to_string();
        let knowledge = KnowledgeText {
            content,
            source_document_names: documents.iter().map(|d| d.name.clone()).collect(),
            character_limit: self.character_limit,
            updated_at: Some(Utc::now()),
        };

        self.backend
            .save(&knowledge)
            .await
            .map_err(StoreError::Persistence)?;

        info!(
            documents = documents.len(),
            extracted_chars = combined.chars().count(),
            stored_chars = knowledge.char_len(),
            "knowledge replaced"
        );
        self.replace_snapshot(Arc::new(knowledge.clone()));
        Ok(knowledge)
    }

    fn replace_snapshot(&self, knowledge: Arc<KnowledgeText>) {
        match self.current.write() {
            Ok(mut guard) => *guard = knowledge,
            Err(poisoned) => *poisoned.into_inner() = knowledge,
        }
    }
}

/// Joins non-empty document texts with [`DOCUMENT_SEPARATOR`].
pub fn combine_texts(texts: &[String]) -> String {
    texts
        .iter()
        .filter(|t| !t.is_empty())
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(DOCUMENT_SEPARATOR)
}

/// Returns the first `limit` characters of `text`.
pub fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

fn archive_upload(dir: &Path, doc: &Document) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let digest = hex::encode(Sha256::digest(&doc.bytes));
    let ext = doc.extension().unwrap_or_else(|| "bin".to_string());
    let path = dir.join(format!("{}.{}", digest, ext));
    if !path.exists() {
        std::fs::write(&path, &doc.bytes)?;
    }
    Ok(())
}
