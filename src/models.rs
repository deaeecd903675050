//! Core data models used throughout docqa.
//!
//! These types represent the uploaded documents, the persisted knowledge
//! text, and the question/answer records that flow through the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named binary document submitted for ingestion.
#[derive(Debug, Clone)]
pub struct Document {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl Document {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// Lowercased file extension of the document name, if any.
    pub fn extension(&self) -> Option<String> {
        std::path::Path::new(&self.name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }
}

/// The single blob of text questions are answered from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KnowledgeText {
    pub content: String,
    #[serde(default)]
    pub source_document_names: Vec<String>,
    pub character_limit: usize,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl KnowledgeText {
    pub fn empty(character_limit: usize) -> Self {
        Self {
            content: String::new(),
            source_document_names: Vec::new(),
            character_limit,
            updated_at: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty()
    }

    /// Length in characters, the unit the limit is expressed in.
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}

/// A successful answer from the completion service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Answer {
    pub text: String,
}

impl Answer {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// One question/answer exchange recorded by the conversation log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationEntry {
    pub question: String,
    pub answer: String,
    pub timestamp: DateTime<Utc>,
}
