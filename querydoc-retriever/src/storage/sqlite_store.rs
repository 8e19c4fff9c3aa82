//! SQLite implementation of [`DocumentStore`].
//!
//! Embeddings are stored as little-endian `f16` blobs, halving the database
//! size at a precision cost that does not affect ranking in practice. The
//! on-disk database uses WAL so readers are not blocked while a document is
//! being written.

use super::{DocumentRecord, DocumentStore, StoreStats};
use crate::document::{Chunk, ChunkIndex, Corpus, DocumentId, DocumentIndex, Section, SectionId};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use half::f16;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Database file created in the base directory.
pub const DATABASE_FILE: &str = ".querydoc.db";

#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
    database_path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (creating if needed) `base/.querydoc.db`.
    pub async fn open(base: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(base)
            .await
            .with_context(|| format!("Failed to create {}", base.display()))?;
        let db_path = base.join(DATABASE_FILE);

        let pool = SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(&db_path)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .busy_timeout(std::time::Duration::from_secs(5))
                .foreign_keys(true)
                .create_if_missing(true)
                .auto_vacuum(sqlx::sqlite::SqliteAutoVacuum::Full)
                .page_size(1 << 16)
                .optimize_on_close(true, 1 << 10),
        )
        .await
        .with_context(|| format!("Failed to open {}", db_path.display()))?;

        tracing::debug!("Opened document store at {}", db_path.display());
        Self::new_with_pool(pool, Some(db_path)).await
    }

    /// In-memory store for tests. A single connection keeps the database alive.
    pub async fn open_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::new_with_pool(pool, None).await
    }

    async fn new_with_pool(pool: SqlitePool, database_path: Option<PathBuf>) -> Result<Self> {
        Self::create_tables(&pool).await?;
        Ok(Self {
            pool,
            database_path,
        })
    }

    pub fn database_path(&self) -> Option<&Path> {
        self.database_path.as_deref()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn create_tables(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT UNIQUE NOT NULL,
                content_hash TEXT NOT NULL,
                model TEXT NOT NULL,
                dimension INTEGER NOT NULL,
                ingested_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sections (
                document_id TEXT NOT NULL,
                ordinal INTEGER NOT NULL,
                position INTEGER NOT NULL,
                title TEXT NOT NULL,
                level INTEGER NOT NULL,
                start_page INTEGER NOT NULL,
                end_page INTEGER NOT NULL,
                title_emb BLOB,
                avg_chunk_emb BLOB,
                PRIMARY KEY (document_id, ordinal),
                FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                section_ordinal INTEGER NOT NULL,
                section_title TEXT NOT NULL,
                content TEXT NOT NULL,
                metadata TEXT NOT NULL,
                embedding BLOB NOT NULL,
                CONSTRAINT unique_chunk UNIQUE(document_id, position),
                FOREIGN KEY (document_id, section_ordinal)
                    REFERENCES sections(document_id, ordinal) ON DELETE CASCADE
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id)")
            .execute(pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chunks_section ON chunks(document_id, section_ordinal)",
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    async fn load_sections(&self, document_id: &str) -> Result<Vec<Section>> {
        let rows = sqlx::query(
            "SELECT ordinal, title, level, start_page, end_page, title_emb, avg_chunk_emb
             FROM sections WHERE document_id = ?1 ORDER BY position",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| section_from_row(document_id, row)).collect()
    }

    async fn load_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            "SELECT section_ordinal, section_title, content, metadata, embedding
             FROM chunks WHERE document_id = ?1 ORDER BY position",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| chunk_from_row(document_id, row)).collect()
    }

    async fn count(&self, sql: &str) -> Result<usize> {
        let count: i64 = sqlx::query_scalar(sql).fetch_one(&self.pool).await?;
        Ok(count as usize)
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn save_document(
        &self,
        document: &DocumentIndex,
        content_hash: &str,
        model: &str,
    ) -> Result<DocumentRecord> {
        let ingested_at = Utc::now();
        let dimension = document.chunks.dimension().unwrap_or(0);
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM documents WHERE id = ?1")
            .bind(&document.id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO documents (id, content_hash, model, dimension, ingested_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&document.id)
        .bind(content_hash)
        .bind(model)
        .bind(dimension as i64)
        .bind(ingested_at)
        .execute(&mut *tx)
        .await?;

        for (position, section) in document.sections.iter().enumerate() {
            if section.id.document != document.id {
                bail!(
                    "Section {} does not belong to document '{}'",
                    section.id,
                    document.id
                );
            }
            sqlx::query(
                r#"
                INSERT INTO sections
                    (document_id, ordinal, position, title, level, start_page, end_page, title_emb, avg_chunk_emb)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )
            .bind(&document.id)
            .bind(i64::from(section.id.ordinal))
            .bind(position as i64)
            .bind(&section.title)
            .bind(i64::from(section.level))
            .bind(i64::from(section.start_page))
            .bind(i64::from(section.end_page))
            .bind(section.title_emb.as_deref().map(encode_embedding))
            .bind(section.avg_chunk_emb.as_deref().map(encode_embedding))
            .execute(&mut *tx)
            .await?;
        }

        for (position, chunk) in document.chunks.iter().enumerate() {
            if chunk.section_id.document != document.id {
                bail!(
                    "Chunk {} belongs to {}, not document '{}'",
                    position,
                    chunk.section_id,
                    document.id
                );
            }
            sqlx::query(
                r#"
                INSERT INTO chunks
                    (document_id, position, section_ordinal, section_title, content, metadata, embedding)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(&document.id)
            .bind(position as i64)
            .bind(i64::from(chunk.section_id.ordinal))
            .bind(&chunk.section_title)
            .bind(&chunk.content)
            .bind(serde_json::to_string(&chunk.metadata)?)
            .bind(encode_embedding(&chunk.embedding))
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to store chunk {position} of {}", chunk.section_id))?;
        }

        tx.commit().await?;
        tracing::info!(
            "Stored document '{}' ({} sections, {} chunks)",
            document.id,
            document.sections.len(),
            document.chunks.len()
        );

        Ok(DocumentRecord {
            id: document.id.clone(),
            content_hash: content_hash.to_string(),
            model: model.to_string(),
            section_count: document.sections.len(),
            chunk_count: document.chunks.len(),
            dimension,
            ingested_at,
        })
    }

    async fn load_document(&self, id: &str) -> Result<Option<DocumentIndex>> {
        let exists: Option<i64> = sqlx::query_scalar("SELECT seq FROM documents WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Ok(None);
        }

        let sections = self.load_sections(id).await?;
        let chunks = ChunkIndex::new(self.load_chunks(id).await?)
            .with_context(|| format!("Stored chunks of '{id}' are inconsistent"))?;
        Ok(Some(DocumentIndex {
            id: id.to_string(),
            sections,
            chunks,
        }))
    }

    async fn list_documents(&self) -> Result<Vec<DocumentRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT d.id, d.content_hash, d.model, d.dimension, d.ingested_at,
                (SELECT COUNT(*) FROM sections s WHERE s.document_id = d.id) AS section_count,
                (SELECT COUNT(*) FROM chunks c WHERE c.document_id = d.id) AS chunk_count
            FROM documents d
            ORDER BY d.seq
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(DocumentRecord {
                    id: row.try_get("id")?,
                    content_hash: row.try_get("content_hash")?,
                    model: row.try_get("model")?,
                    section_count: row.try_get::<i64, _>("section_count")? as usize,
                    chunk_count: row.try_get::<i64, _>("chunk_count")? as usize,
                    dimension: row.try_get::<i64, _>("dimension")? as usize,
                    ingested_at: row.try_get::<DateTime<Utc>, _>("ingested_at")?,
                })
            })
            .collect()
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        let deleted = result.rows_affected() > 0;
        if deleted {
            tracing::info!("Deleted document '{}'", id);
        }
        Ok(deleted)
    }

    async fn document_hash(&self, id: &str) -> Result<Option<String>> {
        Ok(
            sqlx::query_scalar("SELECT content_hash FROM documents WHERE id = ?1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn load_corpus(&self, ids: Option<&[DocumentId]>) -> Result<Corpus> {
        let stored: Vec<DocumentId> = sqlx::query_scalar("SELECT id FROM documents ORDER BY seq")
            .fetch_all(&self.pool)
            .await?;

        let selected: Vec<&DocumentId> = match ids {
            Some(ids) => {
                if let Some(unknown) = ids.iter().find(|id| !stored.contains(*id)) {
                    bail!("Unknown document '{unknown}'");
                }
                stored.iter().filter(|id| ids.contains(*id)).collect()
            }
            None => stored.iter().collect(),
        };

        let mut documents = Vec::with_capacity(selected.len());
        for id in selected {
            if let Some(document) = self.load_document(id).await? {
                documents.push(document);
            }
        }

        let corpus = Corpus::from_documents(documents).context("Stored documents cannot be merged")?;
        tracing::debug!(
            "Loaded corpus of {} documents ({} sections, {} chunks)",
            corpus.documents().len(),
            corpus.sections().len(),
            corpus.chunks().len()
        );
        Ok(corpus)
    }

    async fn ensure_model(&self, ids: Option<&[DocumentId]>, model: &str) -> Result<()> {
        let stored: Vec<(DocumentId, String)> = sqlx::query_as("SELECT id, model FROM documents ORDER BY seq")
            .fetch_all(&self.pool)
            .await?;

        let mismatched: Vec<String> = stored
            .iter()
            .filter(|(id, _)| ids.is_none_or(|ids| ids.contains(id)))
            .filter(|(_, stored_model)| stored_model != model)
            .map(|(id, stored_model)| format!("'{id}' ({stored_model})"))
            .collect();
        if !mismatched.is_empty() {
            bail!(
                "Documents {} were embedded with a different model than the configured '{model}', \
                 re-ingest them with --force or configure their model",
                mismatched.join(", ")
            );
        }
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let dimension: Option<i64> =
            sqlx::query_scalar("SELECT dimension FROM documents WHERE dimension > 0 ORDER BY seq LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;

        Ok(StoreStats {
            documents: self.count("SELECT COUNT(*) FROM documents").await?,
            sections: self.count("SELECT COUNT(*) FROM sections").await?,
            searchable_sections: self
                .count(
                    "SELECT COUNT(*) FROM sections WHERE title_emb IS NOT NULL AND avg_chunk_emb IS NOT NULL",
                )
                .await?,
            chunks: self.count("SELECT COUNT(*) FROM chunks").await?,
            dimension: dimension.map(|d| d as usize),
            database_path: self.database_path.clone(),
        })
    }
}

fn section_from_row(document_id: &str, row: &SqliteRow) -> Result<Section> {
    let ordinal: i64 = row.try_get("ordinal")?;
    let title_emb: Option<Vec<u8>> = row.try_get("title_emb")?;
    let avg_chunk_emb: Option<Vec<u8>> = row.try_get("avg_chunk_emb")?;

    let mut section = Section::new(
        SectionId::new(document_id, ordinal as u32),
        row.try_get::<String, _>("title")?,
        row.try_get::<i64, _>("start_page")? as u32,
        row.try_get::<i64, _>("end_page")? as u32,
    )
    .with_level(row.try_get::<i64, _>("level")? as u32);
    section.title_emb = title_emb.as_deref().map(decode_embedding).transpose()?;
    section.avg_chunk_emb = avg_chunk_emb.as_deref().map(decode_embedding).transpose()?;
    Ok(section)
}

fn chunk_from_row(document_id: &str, row: &SqliteRow) -> Result<Chunk> {
    let ordinal: i64 = row.try_get("section_ordinal")?;
    let metadata: String = row.try_get("metadata")?;
    let embedding: Vec<u8> = row.try_get("embedding")?;

    Ok(Chunk {
        section_id: SectionId::new(document_id, ordinal as u32),
        section_title: row.try_get("section_title")?,
        content: row.try_get("content")?,
        metadata: serde_json::from_str(&metadata)?,
        embedding: decode_embedding(&embedding)?,
    })
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding
        .iter()
        .flat_map(|&x| f16::from_f32(x).to_le_bytes())
        .collect()
}

fn decode_embedding(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 2 != 0 {
        bail!("Embedding blob has odd length {}", bytes.len());
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| f16::from_le_bytes([pair[0], pair[1]]).to_f32())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const MODEL: &str = "multilingual-e5-small";

    fn document(id: &str, hot: f32) -> DocumentIndex {
        let intro = SectionId::new(id, 0);
        let setup = SectionId::new(id, 1);

        let mut sections = vec![
            Section::new(intro.clone(), "Introduction", 1, 1),
            Section::new(setup.clone(), "Setup", 2, 4).with_level(2),
        ];
        sections[0].title_emb = Some(vec![1.0, 0.0]);
        sections[0].avg_chunk_emb = Some(vec![0.75, 0.25]);
        sections[1].title_emb = Some(vec![0.0, 1.0]);

        let mut metadata = serde_json::Map::new();
        metadata.insert("start_page".into(), 1.into());
        let chunks = ChunkIndex::new(vec![
            Chunk {
                section_id: intro.clone(),
                section_title: "Introduction".to_string(),
                content: "Welcome".to_string(),
                metadata: metadata.clone(),
                embedding: vec![hot, 0.5],
            },
            Chunk {
                section_id: intro,
                section_title: "Introduction".to_string(),
                content: "Overview".to_string(),
                metadata,
                embedding: vec![0.5, 0.0],
            },
        ])
        .unwrap();

        DocumentIndex {
            id: id.to_string(),
            sections,
            chunks,
        }
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() -> Result<()> {
        let store = SqliteStore::open_memory().await?;
        let original = document("manual", 1.0);

        let record = store.save_document(&original, "abc", MODEL).await?;
        assert_eq!(record.section_count, 2);
        assert_eq!(record.chunk_count, 2);
        assert_eq!(record.dimension, 2);
        assert_eq!(record.model, MODEL);

        // All values are exact in f16
        let loaded = store.load_document("manual").await?.unwrap();
        assert_eq!(loaded, original);
        assert!(store.load_document("missing").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_save_replaces_existing_document() -> Result<()> {
        let store = SqliteStore::open_memory().await?;
        store.save_document(&document("manual", 1.0), "v1", MODEL).await?;

        let mut smaller = document("manual", 0.25);
        smaller.chunks = ChunkIndex::new(smaller.chunks.into_chunks().into_iter().take(1).collect())?;
        store.save_document(&smaller, "v2", MODEL).await?;

        assert_eq!(store.document_hash("manual").await?, Some("v2".to_string()));
        let loaded = store.load_document("manual").await?.unwrap();
        assert_eq!(loaded.chunks.len(), 1);
        assert_eq!(loaded.chunks.as_slice()[0].embedding, vec![0.25, 0.5]);

        let stats = store.stats().await?;
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.chunks, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_cascades() -> Result<()> {
        let store = SqliteStore::open_memory().await?;
        store.save_document(&document("a", 1.0), "ha", MODEL).await?;
        store.save_document(&document("b", 1.0), "hb", MODEL).await?;

        assert!(store.delete_document("a").await?);
        assert!(!store.delete_document("a").await?);

        let stats = store.stats().await?;
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.sections, 2);
        assert_eq!(stats.searchable_sections, 1);
        assert_eq!(stats.chunks, 2);
        assert_eq!(stats.dimension, Some(2));
        assert!(stats.database_path.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_list_and_corpus_order() -> Result<()> {
        let store = SqliteStore::open_memory().await?;
        store.save_document(&document("b", 1.0), "hb", MODEL).await?;
        store.save_document(&document("a", 1.0), "ha", MODEL).await?;

        let ids: Vec<String> = store.list_documents().await?.into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["b", "a"]);

        let corpus = store.load_corpus(None).await?;
        assert_eq!(corpus.documents(), &["b".to_string(), "a".to_string()]);
        assert_eq!(corpus.chunks().len(), 4);

        let only_a = store.load_corpus(Some(&["a".to_string()])).await?;
        assert_eq!(only_a.documents(), &["a".to_string()]);

        assert!(store.load_corpus(Some(&["zzz".to_string()])).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_ensure_model() -> Result<()> {
        let store = SqliteStore::open_memory().await?;
        store.save_document(&document("a", 1.0), "ha", MODEL).await?;
        store.save_document(&document("b", 1.0), "hb", "BAAI/bge-small-en-v1.5@main").await?;

        let records = store.list_documents().await?;
        assert_eq!(records[0].model, MODEL);
        assert_eq!(records[1].model, "BAAI/bge-small-en-v1.5@main");

        store.ensure_model(Some(&["a".to_string()]), MODEL).await?;
        let err = store.ensure_model(None, MODEL).await.unwrap_err().to_string();
        assert!(err.contains("'b' (BAAI/bge-small-en-v1.5@main)"), "{err}");
        assert!(!err.contains("'a'"), "{err}");
        assert!(err.contains(MODEL));

        // Re-ingesting with the configured model clears the mismatch
        store.save_document(&document("b", 1.0), "hb2", MODEL).await?;
        store.ensure_model(None, MODEL).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_on_disk_store_persists() -> Result<()> {
        let dir = tempdir()?;
        {
            let store = SqliteStore::open(dir.path()).await?;
            store.save_document(&document("manual", 1.0), "hash", MODEL).await?;
            store.close().await;
        }
        assert!(dir.path().join(DATABASE_FILE).exists());

        let reopened = SqliteStore::open(dir.path()).await?;
        assert_eq!(reopened.list_documents().await?.len(), 1);
        assert_eq!(
            reopened.stats().await?.database_path,
            Some(dir.path().join(DATABASE_FILE))
        );
        Ok(())
    }

    #[test]
    fn test_embedding_blob_encoding() {
        let bytes = encode_embedding(&[1.0, -0.5, 0.0]);
        assert_eq!(bytes.len(), 6);
        assert_eq!(decode_embedding(&bytes).unwrap(), vec![1.0, -0.5, 0.0]);
        assert!(decode_embedding(&[0u8; 3]).is_err());
    }
}
