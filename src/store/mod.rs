//! Tenant-scoped persistence for documents and question/answer history.
//!
//! Every read takes the caller's [`Identity`] as a query predicate; a row owned by someone else
//! is indistinguishable from a missing row.

pub mod blob;
pub mod sqlite;
pub mod types;

pub use blob::{BlobStore, BlobStoreError, LocalBlobStore};
pub use sqlite::SqliteStore;
pub use types::{
    Document, DocumentId, DocumentSummary, HistoryEntry, NewDocument, NewHistoryEntry,
    StorageReference,
};

use crate::auth::Identity;
use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by document store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No row exists with that id for the requesting identity.
    #[error("not found")]
    NotFound,
    /// Database driver error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// Raw bytes could not be written or cleaned up.
    #[error("blob storage error: {0}")]
    Blob(#[from] BlobStoreError),
    /// A stored row could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Transactional store for documents and history.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Persist the document row and its raw bytes atomically.
    async fn create_document(
        &self,
        document: NewDocument,
        bytes: &[u8],
    ) -> Result<Document, StoreError>;

    /// Fetch a document owned by `owner`.
    async fn get_document(&self, owner: &Identity, id: DocumentId)
    -> Result<Document, StoreError>;

    /// List the documents owned by `owner`, newest first.
    async fn list_documents(&self, owner: &Identity) -> Result<Vec<DocumentSummary>, StoreError>;

    /// Record a question/answer pair; fails with [`StoreError::NotFound`] unless the entry's owner
    /// also owns the referenced document.
    async fn record_answer(&self, entry: NewHistoryEntry) -> Result<HistoryEntry, StoreError>;

    /// History owned by `owner`, ordered by `created_at` descending then `id` descending.
    async fn list_history(&self, owner: &Identity) -> Result<Vec<HistoryEntry>, StoreError>;
}
