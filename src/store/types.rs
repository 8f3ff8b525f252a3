//! Records persisted by the document store.

use crate::auth::Identity;
use crate::ingest::MimeType;
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Store-assigned document row id.
pub type DocumentId = i64;

/// Name of the raw-bytes object backing a document in the blob area.
///
/// Always `<uuid-v4 hex>_<sanitized filename>`, so two uploads with the same name never collide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageReference(String);

impl StorageReference {
    /// Derive a fresh reference for an already-sanitized filename.
    pub fn generate(filename: &str) -> Self {
        Self(format!("{}_{}", Uuid::new_v4().simple(), filename))
    }

    /// Wrap a reference read back from storage.
    pub fn from_stored(value: String) -> Self {
        Self(value)
    }

    /// Borrow the reference string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Input for [`crate::store::DocumentStore::create_document`].
#[derive(Debug, Clone)]
pub struct NewDocument {
    /// Owning identity.
    pub owner: Identity,
    /// Sanitized client filename.
    pub filename: String,
    /// Sniffed content type.
    pub mime_type: MimeType,
    /// Client-declared content type, kept for traceability only.
    pub declared_mime_type: Option<String>,
    /// Extracted and sanitized text; may be empty.
    pub extracted_text: String,
}

/// A stored document. Immutable once created.
#[derive(Debug, Clone)]
pub struct Document {
    /// Row id.
    pub id: DocumentId,
    /// Owning identity.
    pub owner: Identity,
    /// Sanitized client filename.
    pub filename: String,
    /// Sniffed content type.
    pub mime_type: MimeType,
    /// Client-declared content type.
    pub declared_mime_type: Option<String>,
    /// Size of the raw upload in bytes.
    pub byte_size: i64,
    /// Where the raw bytes live in the blob area.
    pub storage_reference: StorageReference,
    /// Text extracted at upload time.
    pub extracted_text: String,
    /// Creation time (UTC).
    pub created_at: OffsetDateTime,
}

/// Listing view of a document, without its text.
#[derive(Debug, Clone)]
pub struct DocumentSummary {
    /// Row id.
    pub id: DocumentId,
    /// Sanitized client filename.
    pub filename: String,
    /// Sniffed content type.
    pub mime_type: MimeType,
    /// Size of the raw upload in bytes.
    pub byte_size: i64,
    /// Creation time (UTC).
    pub created_at: OffsetDateTime,
}

impl From<&Document> for DocumentSummary {
    fn from(document: &Document) -> Self {
        Self {
            id: document.id,
            filename: document.filename.clone(),
            mime_type: document.mime_type,
            byte_size: document.byte_size,
            created_at: document.created_at,
        }
    }
}

/// Input for [`crate::store::DocumentStore::record_answer`].
#[derive(Debug, Clone)]
pub struct NewHistoryEntry {
    /// Identity that asked; must also own the document.
    pub owner: Identity,
    /// Document the question was asked against.
    pub document_id: DocumentId,
    /// Question as asked.
    pub question: String,
    /// Answer returned to the caller, including fallback answers.
    pub answer: String,
    /// Wall time of the generation call, if one was made.
    pub latency_ms: Option<i64>,
    /// Provider-reported token usage, if any.
    pub tokens_used: Option<i64>,
}

/// A persisted question/answer pair.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    /// Row id.
    pub id: i64,
    /// Identity that asked.
    pub owner: Identity,
    /// Document the question was asked against.
    pub document_id: DocumentId,
    /// Question as asked.
    pub question: String,
    /// Answer returned to the caller.
    pub answer: String,
    /// Creation time (UTC).
    pub created_at: OffsetDateTime,
    /// Wall time of the generation call, if one was made.
    pub latency_ms: Option<i64>,
    /// Provider-reported token usage, if any.
    pub tokens_used: Option<i64>,
}
