//! Append-only log of answered questions.
//!
//! Entries are kept in memory and, when a path is configured, mirrored to a
//! JSON Lines file so the history survives restarts.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::warn;

use crate::models::ConversationEntry;

#[derive(Default)]
pub struct ConversationLog {
    entries: Mutex<Vec<ConversationEntry>>,
    path: Option<PathBuf>,
}

impl ConversationLog {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Opens a file-backed log, loading any entries already on disk.
    ///
    /// Lines that fail to parse are skipped with a warning.
    pub fn open(path: &Path) -> Result<Self> {
        let mut entries = Vec::new();
        match std::fs::File::open(path) {
            Ok(file) => {
                for (n, line) in BufReader::new(file).lines().enumerate() {
                    let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str(&line) {
                        Ok(entry) => entries.push(entry),
                        Err(e) => warn!(line = n + 1, error = %e, "skipping unreadable log line"),
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to open {}", path.display()))
            }
        }
        Ok(Self {
            entries: Mutex::new(entries),
            path: Some(path.to_path_buf()),
        })
    }

    /// Records one exchange, stamped with the current time.
    pub fn append(&self, question: &str, answer: &str) -> Result<ConversationEntry> {
        let entry = ConversationEntry {
            question: question.to_string(),
            answer: answer.to_string(),
            timestamp: Utc::now(),
        };

        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("conversation log lock poisoned"))?;

        if let Some(path) = &self.path {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            writeln!(file, "{}", serde_json::to_string(&entry)?)?;
        }

        entries.push(entry.clone());
        Ok(entry)
    }

    /// All entries in arrival order.
    pub fn entries(&self) -> Vec<ConversationEntry> {
        match self.entries.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn appends_in_arrival_order() {
        let log = ConversationLog::in_memory();
        log.append("q1", "a1").unwrap();
        log.append("q2", "a2").unwrap();
        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].question, "q1");
        assert_eq!(entries[1].answer, "a2");
        assert!(entries[0].timestamp <= entries[1].timestamp);
    }

    #[test]
    fn file_log_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("logs").join("chat.jsonl");
        {
            let log = ConversationLog::open(&path).unwrap();
            assert!(log.is_empty());
            log.append("where?", "here").unwrap();
        }
        let reopened = ConversationLog::open(&path).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.entries()[0].question, "where?");
    }

    #[test]
    fn corrupt_lines_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("chat.jsonl");
        let good = serde_json::to_string(&ConversationEntry {
            question: "q".into(),
            answer: "a".into(),
            timestamp: Utc::now(),
        })
        .unwrap();
        std::fs::write(&path, format!("{{broken\n{}\n", good)).unwrap();
        let log = ConversationLog::open(&path).unwrap();
        assert_eq!(log.len(), 1);
    }
}
