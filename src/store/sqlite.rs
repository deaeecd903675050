//! SQLite backend: the knowledge lives in a single-row table.

use std::path::Path;
use std::str::FromStr;

use anyhow::Result;
use async_trait::async_trait;
use chrono::DateTime;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use super::KnowledgeBackend;
use crate::models::KnowledgeText;

pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Opens (creating if needed) the database at `path` and ensures the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS knowledge (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                content TEXT NOT NULL,
                sources_json TEXT NOT NULL DEFAULT '[]',
                character_limit INTEGER NOT NULL,
                updated_at INTEGER
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl KnowledgeBackend for SqliteBackend {
    async fn load(&self) -> Result<Option<KnowledgeText>> {
        let row: Option<(String, String, i64, Option<i64>)> = sqlx::query_as(
            "SELECT content, sources_json, character_limit, updated_at FROM knowledge WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some((content, sources_json, character_limit, updated_at)) = row else {
            return Ok(None);
        };

        Ok(Some(KnowledgeText {
            content,
            source_document_names: serde_json::from_str(&sources_json)?,
            character_limit: character_limit.max(0) as usize,
            updated_at: updated_at.and_then(|ts| DateTime::from_timestamp(ts, 0)),
        }))
    }

    async fn save(&self, knowledge: &KnowledgeText) -> Result<()> {
        let sources_json = serde_json::to_string(&knowledge.source_document_names)?;
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO knowledge (id, content, sources_json, character_limit, updated_at)
            VALUES (1, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                content = excluded.content,
                sources_json = excluded.sources_json,
                character_limit = excluded.character_limit,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&knowledge.content)
        .bind(&sources_json)
        .bind(knowledge.character_limit as i64)
        .bind(knowledge.updated_at.map(|t| t.timestamp()))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }
}
