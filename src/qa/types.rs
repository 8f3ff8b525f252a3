//! Requests, results, and errors of the document service.

use crate::ingest::MAX_UPLOAD_BYTES;
use crate::store::{HistoryEntry, StoreError};
use std::time::Duration;
use thiserror::Error;

/// Answer returned when no generation provider is configured.
pub const UNCONFIGURED_ANSWER: &str =
    "Answer generation is not configured. Please set the GENERATION_API_KEY environment variable.";
/// Answer returned when the provider succeeded but produced no text.
pub const NO_ANSWER: &str =
    "Sorry, I was not able to generate an answer based on the provided context.";
/// Prefix of the answer returned when the provider call failed.
pub const GENERATION_ERROR_PREFIX: &str = "Error generating response: ";
/// Longest question passed to the generator, in characters; history keeps the full text.
pub const MAX_QUESTION_CHARS: usize = 4000;

/// Errors emitted by the document service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Upload exceeds [`MAX_UPLOAD_BYTES`].
    #[error("upload of {size} bytes exceeds the {limit} byte limit")]
    TooLarge {
        /// Bytes received (may be a lower bound when reading stopped early).
        size: usize,
        /// Configured limit.
        limit: usize,
    },
    /// Sniffed content is neither plain text nor PDF.
    #[error("unsupported file type; only plain text and PDF are accepted")]
    UnsupportedType,
    /// PDF is password protected.
    #[error("encrypted documents are not supported")]
    EncryptedDocument,
    /// Document could not be parsed.
    #[error("document could not be parsed: {0}")]
    MalformedDocument(String),
    /// Extraction exceeded its time bound.
    #[error("text extraction timed out after {0:?}")]
    ExtractionTimedOut(Duration),
    /// No document with that id exists for the caller.
    #[error("document not found")]
    NotFound,
    /// Persistence failed.
    #[error("storage failure: {0}")]
    Store(#[source] StoreError),
}

impl From<StoreError> for ServiceError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound => Self::NotFound,
            other => Self::Store(other),
        }
    }
}

impl ServiceError {
    /// Build the size error for `size` received bytes.
    pub fn too_large(size: usize) -> Self {
        Self::TooLarge {
            size,
            limit: MAX_UPLOAD_BYTES,
        }
    }
}

/// Raw upload as received at the boundary.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Client filename, unsanitized.
    pub filename: String,
    /// Client-declared content type, if any.
    pub declared_mime_type: Option<String>,
    /// Payload.
    pub bytes: Vec<u8>,
}

/// How an answer was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerSource {
    /// Text generated by the model.
    Model,
    /// No provider configured; no call was made.
    Unconfigured,
    /// Provider call failed or timed out.
    ProviderError,
    /// Provider returned no text.
    Empty,
}

impl AnswerSource {
    /// Whether the answer is a fallback rather than model output.
    pub fn is_fallback(self) -> bool {
        self != Self::Model
    }
}

/// Result of [`crate::qa::DocumentApi::ask`].
#[derive(Debug, Clone)]
pub struct Answer {
    /// Text returned to the caller.
    pub text: String,
    /// How the text was produced.
    pub source: AnswerSource,
    /// History row recorded for this ask.
    pub history: HistoryEntry,
}

/// Time bounds and sizes applied by the service.
#[derive(Debug, Clone, Copy)]
pub struct ServiceSettings {
    /// Upper bound on text extraction per upload.
    pub extraction_timeout: Duration,
    /// Upper bound on one generation call.
    pub generation_timeout: Duration,
    /// Characters of document text passed as context.
    pub context_max_chars: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            extraction_timeout: Duration::from_secs(30),
            generation_timeout: Duration::from_secs(30),
            context_max_chars: crate::config::DEFAULT_CONTEXT_MAX_CHARS,
        }
    }
}

impl From<&crate::config::Config> for ServiceSettings {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            extraction_timeout: config.extraction_timeout,
            generation_timeout: config.generation.timeout,
            context_max_chars: config.context_max_chars,
        }
    }
}
