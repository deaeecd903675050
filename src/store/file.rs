//! JSON file backend.
//!
//! The artifact is written to a temporary file in the same directory and
//! renamed over the target, so readers never observe a partial write.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::KnowledgeBackend;
use crate::models::KnowledgeText;

pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parent_dir(&self) -> &Path {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        }
    }
}

#[async_trait]
impl KnowledgeBackend for FileBackend {
    async fn load(&self) -> Result<Option<KnowledgeText>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read {}", self.path.display()))
            }
        };
        let knowledge = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse {}", self.path.display()))?;
        Ok(Some(knowledge))
    }

    async fn save(&self, knowledge: &KnowledgeText) -> Result<()> {
        let dir = self.parent_dir();
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
        serde_json::to_writer_pretty(&mut tmp, knowledge)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn knowledge(content: String) -> KnowledgeText {
        KnowledgeText {
            content,
            source_document_names: vec!["doc.pdf".to_string()],
            character_limit: 10_000,
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn missing_file_loads_as_none() {
        let tmp = TempDir::new().unwrap();
        let backend = FileBackend::new(tmp.path().join("nested").join("kb.json"));
        assert!(backend.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_creates_parent_and_replaces() {
        let tmp = TempDir::new().unwrap();
        let backend = FileBackend::new(tmp.path().join("nested").join("kb.json"));
        backend.save(&knowledge("first".into())).await.unwrap();
        backend.save(&knowledge("second".into())).await.unwrap();
        let loaded = backend.load().await.unwrap().unwrap();
        assert_eq!(loaded.content, "second");
        assert_eq!(loaded.source_document_names, vec!["doc.pdf"]);
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("kb.json");
        std::fs::write(&path, b"{ not json").unwrap();
        assert!(FileBackend::new(path).load().await.is_err());
    }

    #[tokio::test]
    async fn unwritable_location_fails_save() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, b"a file, not a directory").unwrap();
        let backend = FileBackend::new(blocker.join("kb.json"));
        assert!(backend.save(&knowledge("x".into())).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_readers_never_see_torn_writes() {
        let tmp = TempDir::new().unwrap();
        let backend = Arc::new(FileBackend::new(tmp.path().join("kb.json")));
        let big_a = "a".repeat(200_000);
        let big_b = "b".repeat(200_000);
        backend.save(&knowledge(big_a.clone())).await.unwrap();

        let writer = {
            let backend = backend.clone();
            let (a, b) = (big_a.clone(), big_b.clone());
            tokio::spawn(async move {
                for i in 0..20 {
                    let content = if i % 2 == 0 { b.clone() } else { a.clone() };
                    backend.save(&knowledge(content)).await.unwrap();
                }
            })
        };

        let mut readers = Vec::new();
        for _ in 0..3 {
            let backend = backend.clone();
            let (a, b) = (big_a.clone(), big_b.clone());
            readers.push(tokio::spawn(async move {
                for _ in 0..20 {
                    let loaded = backend.load().await.unwrap().unwrap();
                    assert!(loaded.content == a || loaded.content == b);
                    tokio::task::yield_now().await;
                }
            }));
        }

        writer.await.unwrap();
        for r in readers {
            r.await.unwrap();
        }
    }
}
