//! In-process [`KnowledgeBackend`] for tests and throwaway sessions.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;

use super::KnowledgeBackend;
use crate::models::KnowledgeText;

#[derive(Default)]
pub struct MemoryBackend {
    slot: Mutex<Option<KnowledgeText>>,
    fail_writes: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `save` fail, simulating an unwritable store.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KnowledgeBackend for MemoryBackend {
    async fn load(&self) -> Result<Option<KnowledgeText>> {
        let slot = self
            .slot
            .lock()
            .map_err(|_| anyhow::anyhow!("memory backend lock poisoned"))?;
        Ok(slot.clone())
    }

    async fn save(&self, knowledge: &KnowledgeText) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("memory backend is read-only");
        }
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| anyhow::anyhow!("memory backend lock poisoned"))?;
        *slot = Some(knowledge.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
