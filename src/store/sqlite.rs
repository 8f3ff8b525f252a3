//! SQLite-backed [`DocumentStore`].

use super::blob::BlobStore;
use super::types::{
    Document, DocumentId, DocumentSummary, HistoryEntry, NewDocument, NewHistoryEntry,
    StorageReference,
};
use super::{DocumentStore, StoreError};
use crate::auth::Identity;
use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use std::str::FromStr;
use std::sync::Arc;
use time::OffsetDateTime;

/// Document store over a SQLite pool, with raw bytes kept in a [`BlobStore`].
pub struct SqliteStore {
    pool: SqlitePool,
    blobs: Arc<dyn BlobStore>,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `database_url`.
    ///
    /// In-memory URLs are pinned to a single long-lived connection so every query sees the same
    /// database.
    pub async fn connect(database_url: &str, blobs: Arc<dyn BlobStore>) -> Result<Self, StoreError> {
        let in_memory = database_url.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            if let Some(parent) = options.get_filename().parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|error| StoreError::Database(sqlx::Error::Io(error)))?;
                }
            }
            options = options.journal_mode(SqliteJournalMode::Wal);
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options.connect_with(options).await?;
        tracing::debug!(database_url, in_memory, "Connected to SQLite");
        Ok(Self { pool, blobs })
    }

    /// Create tables and indexes if they do not already exist.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner TEXT NOT NULL,
                filename TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                declared_mime_type TEXT,
                byte_size INTEGER NOT NULL,
                storage_reference TEXT NOT NULL UNIQUE,
                extracted_text TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_documents_owner ON documents (owner, created_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS qa_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner TEXT NOT NULL,
                document_id INTEGER NOT NULL REFERENCES documents (id),
                question TEXT NOT NULL,
                answer TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                latency_ms INTEGER,
                tokens_used INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_qa_history_owner ON qa_history (owner, created_at)",
        )
        .execute(&self.pool)
        .await?;

        tracing::debug!("Schema ready");
        Ok(())
    }

    /// Close the underlying pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn create_document(
        &self,
        document: NewDocument,
        bytes: &[u8],
    ) -> Result<Document, StoreError> {
        let storage_reference = StorageReference::generate(&document.filename);
        let created_at = OffsetDateTime::now_utc();
        let byte_size = i64::try_from(bytes.len())
            .map_err(|_| StoreError::Corrupt("upload size exceeds i64".into()))?;

        let mut tx = self.pool.begin().await?;
        let id = sqlx::query(
            r#"
            INSERT INTO documents
                (owner, filename, mime_type, declared_mime_type, byte_size, storage_reference,
                 extracted_text, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(document.owner.as_str())
        .bind(&document.filename)
        .bind(document.mime_type.as_str())
        .bind(&document.declared_mime_type)
        .bind(byte_size)
        .bind(storage_reference.as_str())
        .bind(&document.extracted_text)
        .bind(to_nanos(created_at))
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        if let Err(error) = self.blobs.put(&storage_reference, bytes).await {
            tx.rollback().await?;
            return Err(error.into());
        }

        if let Err(error) = tx.commit().await {
            if let Err(cleanup) = self.blobs.delete(&storage_reference).await {
                tracing::warn!(
                    reference = %storage_reference,
                    error = %cleanup,
                    "Failed to remove blob after aborted commit"
                );
            }
            return Err(error.into());
        }

        tracing::debug!(document_id = id, owner = %document.owner, byte_size, "Document row committed");

        Ok(Document {
            id,
            owner: document.owner,
            filename: document.filename,
            mime_type: document.mime_type,
            declared_mime_type: document.declared_mime_type,
            byte_size,
            storage_reference,
            extracted_text: document.extracted_text,
            created_at,
        })
    }

    async fn get_document(
        &self,
        owner: &Identity,
        id: DocumentId,
    ) -> Result<Document, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, owner, filename, mime_type, declared_mime_type, byte_size,
                   storage_reference, extracted_text, created_at
            FROM documents
            WHERE id = ? AND owner = ?
            "#,
        )
        .bind(id)
        .bind(owner.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;

        document_from_row(&row)
    }

    async fn list_documents(&self, owner: &Identity) -> Result<Vec<DocumentSummary>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, filename, mime_type, byte_size, created_at
            FROM documents
            WHERE owner = ?
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(owner.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<DocumentSummary, StoreError> {
                Ok(DocumentSummary {
                    id: row.try_get("id")?,
                    filename: row.try_get("filename")?,
                    mime_type: parse_mime(row.try_get("mime_type")?)?,
                    byte_size: row.try_get("byte_size")?,
                    created_at: from_nanos(row.try_get("created_at")?)?,
                })
            })
            .collect()
    }

    async fn record_answer(&self, entry: NewHistoryEntry) -> Result<HistoryEntry, StoreError> {
        let created_at = OffsetDateTime::now_utc();
        let mut tx = self.pool.begin().await?;

        // The ownership predicate lives in the insert itself, so no read-then-write gap exists.
        let result = sqlx::query(
            r#"
            INSERT INTO qa_history
                (owner, document_id, question, answer, created_at, latency_ms, tokens_used)
            SELECT ?, id, ?, ?, ?, ?, ?
            FROM documents
            WHERE id = ? AND owner = ?
            "#,
        )
        .bind(entry.owner.as_str())
        .bind(&entry.question)
        .bind(&entry.answer)
        .bind(to_nanos(created_at))
        .bind(entry.latency_ms)
        .bind(entry.tokens_used)
        .bind(entry.document_id)
        .bind(entry.owner.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::NotFound);
        }
        tx.commit().await?;

        Ok(HistoryEntry {
            id: result.last_insert_rowid(),
            owner: entry.owner,
            document_id: entry.document_id,
            question: entry.question,
            answer: entry.answer,
            created_at,
            latency_ms: entry.latency_ms,
            tokens_used: entry.tokens_used,
        })
    }

    async fn list_history(&self, owner: &Identity) -> Result<Vec<HistoryEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner, document_id, question, answer, created_at, latency_ms, tokens_used
            FROM qa_history
            WHERE owner = ?
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(owner.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<HistoryEntry, StoreError> {
                Ok(HistoryEntry {
                    id: row.try_get("id")?,
                    owner: Identity::new(row.try_get::<String, _>("owner")?),
                    document_id: row.try_get("document_id")?,
                    question: row.try_get("question")?,
                    answer: row.try_get("answer")?,
                    created_at: from_nanos(row.try_get("created_at")?)?,
                    latency_ms: row.try_get("latency_ms")?,
                    tokens_used: row.try_get("tokens_used")?,
                })
            })
            .collect()
    }
}

fn document_from_row(row: &SqliteRow) -> Result<Document, StoreError> {
    Ok(Document {
        id: row.try_get("id")?,
        owner: Identity::new(row.try_get::<String, _>("owner")?),
        filename: row.try_get("filename")?,
        mime_type: parse_mime(row.try_get("mime_type")?)?,
        declared_mime_type: row.try_get("declared_mime_type")?,
        byte_size: row.try_get("byte_size")?,
        storage_reference: StorageReference::from_stored(row.try_get("storage_reference")?),
        extracted_text: row.try_get("extracted_text")?,
        created_at: from_nanos(row.try_get("created_at")?)?,
    })
}

fn parse_mime(value: String) -> Result<crate::ingest::MimeType, StoreError> {
    value
        .parse()
        .map_err(|error: crate::ingest::UnknownMimeType| StoreError::Corrupt(error.to_string()))
}

fn to_nanos(timestamp: OffsetDateTime) -> i64 {
    // i64 nanoseconds cover dates up to 2262.
    timestamp.unix_timestamp_nanos() as i64
}

fn from_nanos(nanos: i64) -> Result<OffsetDateTime, StoreError> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(nanos))
        .map_err(|error| StoreError::Corrupt(format!("timestamp {nanos}: {error}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::MimeType;
    use crate::store::blob::{BlobStoreError, LocalBlobStore};
    use tempfile::TempDir;

    struct BrokenBlobStore;

    #[async_trait]
    impl BlobStore for BrokenBlobStore {
        async fn put(&self, _: &StorageReference, _: &[u8]) -> Result<(), BlobStoreError> {
            Err(BlobStoreError::Io(std::io::Error::other("disk full")))
        }

        async fn delete(&self, _: &StorageReference) -> Result<(), BlobStoreError> {
            Ok(())
        }
    }

    async fn store() -> (SqliteStore, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let blobs = Arc::new(LocalBlobStore::new(dir.path()));
        let store = SqliteStore::connect("sqlite::memory:", blobs).await.unwrap();
        store.migrate().await.unwrap();
        (store, dir)
    }

    fn new_document(owner: &str, text: &str) -> NewDocument {
        NewDocument {
            owner: Identity::new(owner),
            filename: "note.txt".into(),
            mime_type: MimeType::PlainText,
            declared_mime_type: Some("text/plain".into()),
            extracted_text: text.into(),
        }
    }

    fn answer(owner: &str, document_id: DocumentId, question: &str) -> NewHistoryEntry {
        NewHistoryEntry {
            owner: Identity::new(owner),
            document_id,
            question: question.into(),
            answer: "42".into(),
            latency_ms: Some(12),
            tokens_used: None,
        }
    }

    #[tokio::test]
    async fn created_document_is_readable_by_its_owner() {
        let (store, dir) = store().await;
        let alice = Identity::new("alice");
        let created = store
            .create_document(new_document("alice", "hello world"), b"hello world")
            .await
            .unwrap();

        let fetched = store.get_document(&alice, created.id).await.unwrap();
        assert_eq!(fetched.extracted_text, "hello world");
        assert_eq!(fetched.byte_size, 11);
        assert_eq!(fetched.mime_type, MimeType::PlainText);
        assert_eq!(fetched.declared_mime_type.as_deref(), Some("text/plain"));
        assert!(fetched.storage_reference.as_str().ends_with("_note.txt"));
        assert!(dir.path().join(fetched.storage_reference.as_str()).exists());
    }

    #[tokio::test]
    async fn closed_store_rejects_queries() {
        let (store, _dir) = store().await;
        store.close().await;
        let result = store.list_documents(&Identity::new("alice")).await;
        assert!(matches!(
            result,
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        ));
    }

    #[tokio::test]
    async fn other_tenants_see_not_found() {
        let (store, _dir) = store().await;
        let created = store
            .create_document(new_document("alice", "secret"), b"secret")
            .await
            .unwrap();

        let bob = Identity::new("bob");
        assert!(matches!(
            store.get_document(&bob, created.id).await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            store.get_document(&bob, created.id + 100).await,
            Err(StoreError::NotFound)
        ));
        assert!(store.list_documents(&bob).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn blob_failure_leaves_no_row() {
        let store = SqliteStore::connect("sqlite::memory:", Arc::new(BrokenBlobStore))
            .await
            .unwrap();
        store.migrate().await.unwrap();

        let result = store
            .create_document(new_document("alice", "text"), b"text")
            .await;
        assert!(matches!(result, Err(StoreError::Blob(_))));
        assert!(
            store
                .list_documents(&Identity::new("alice"))
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn history_insert_requires_document_ownership() {
        let (store, _dir) = store().await;
        let created = store
            .create_document(new_document("alice", "text"), b"text")
            .await
            .unwrap();

        assert!(matches!(
            store.record_answer(answer("bob", created.id, "mine?")).await,
            Err(StoreError::NotFound)
        ));
        assert!(
            store
                .list_history(&Identity::new("bob"))
                .await
                .unwrap()
                .is_empty()
        );

        let entry = store
            .record_answer(answer("alice", created.id, "what?"))
            .await
            .unwrap();
        assert_eq!(entry.latency_ms, Some(12));
        assert_eq!(entry.tokens_used, None);
    }

    #[tokio::test]
    async fn history_is_scoped_and_newest_first() {
        let (store, _dir) = store().await;
        let alice_doc = store
            .create_document(new_document("alice", "a"), b"a")
            .await
            .unwrap();
        let bob_doc = store
            .create_document(new_document("bob", "b"), b"b")
            .await
            .unwrap();

        store.record_answer(answer("alice", alice_doc.id, "first")).await.unwrap();
        store.record_answer(answer("bob", bob_doc.id, "other")).await.unwrap();
        store.record_answer(answer("alice", alice_doc.id, "second")).await.unwrap();

        let history = store.list_history(&Identity::new("alice")).await.unwrap();
        let questions: Vec<&str> = history.iter().map(|entry| entry.question.as_str()).collect();
        assert_eq!(questions, ["second", "first"]);
        assert!(history.iter().all(|entry| entry.owner.as_str() == "alice"));
    }

    #[tokio::test]
    async fn documents_are_listed_newest_first() {
        let (store, _dir) = store().await;
        let first = store
            .create_document(new_document("alice", "1"), b"1")
            .await
            .unwrap();
        let second = store
            .create_document(new_document("alice", "2"), b"2")
            .await
            .unwrap();

        let listed = store.list_documents(&Identity::new("alice")).await.unwrap();
        let ids: Vec<DocumentId> = listed.iter().map(|summary| summary.id).collect();
        assert_eq!(ids, [second.id, first.id]);
    }

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let (store, _dir) = store().await;
        store.migrate().await.unwrap();
    }

    #[test]
    fn nanosecond_timestamps_round_trip() {
        let now = OffsetDateTime::now_utc();
        assert_eq!(from_nanos(to_nanos(now)).unwrap(), now);
    }
}
