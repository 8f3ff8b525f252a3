//! Document service coordinating ingestion, storage, and question answering.

use crate::{
    auth::Identity,
    generation::{GenerationClient, GenerationRequest},
    ingest::{
        ExtractionError, MAX_UPLOAD_BYTES, extract,
        sanitize::{sanitize_declared_type, sanitize_filename},
        sniff,
    },
    metrics::{MetricsSnapshot, ServiceMetrics},
    qa::{
        context::build_context,
        types::{
            Answer, AnswerSource, GENERATION_ERROR_PREFIX, MAX_QUESTION_CHARS, NO_ANSWER,
            ServiceError, ServiceSettings, UNCONFIGURED_ANSWER, UploadRequest,
        },
    },
    store::{
        Document, DocumentId, DocumentStore, DocumentSummary, HistoryEntry, NewDocument,
        NewHistoryEntry,
    },
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

/// Coordinates the upload and question pipelines over a tenant-scoped store.
///
/// Construct once near process start and share it through an `Arc`; the HTTP surface only
/// depends on [`DocumentApi`].
pub struct DocumentService {
    store: Arc<dyn DocumentStore>,
    generator: Option<Arc<dyn GenerationClient>>,
    metrics: Arc<ServiceMetrics>,
    settings: ServiceSettings,
}

/// Operations exposed to external surfaces.
#[async_trait]
pub trait DocumentApi: Send + Sync {
    /// Validate, extract, and store an upload for `owner`.
    async fn upload(
        &self,
        owner: &Identity,
        request: UploadRequest,
    ) -> Result<Document, ServiceError>;

    /// Answer `question` about one of `owner`'s documents and record the exchange.
    async fn ask(
        &self,
        owner: &Identity,
        document_id: DocumentId,
        question: &str,
    ) -> Result<Answer, ServiceError>;

    /// `owner`'s question/answer history, newest first.
    async fn history(&self, owner: &Identity) -> Result<Vec<HistoryEntry>, ServiceError>;

    /// `owner`'s documents, newest first.
    async fn documents(&self, owner: &Identity) -> Result<Vec<DocumentSummary>, ServiceError>;

    /// Retrieve the current metrics snapshot for diagnostics.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

impl DocumentService {
    /// Build a service over `store`; `generator` is `None` when generation is disabled.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        generator: Option<Arc<dyn GenerationClient>>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            store,
            generator,
            metrics: Arc::new(ServiceMetrics::new()),
            settings,
        }
    }

    /// Shared counters, for surfaces that record their own events.
    pub fn metrics(&self) -> Arc<ServiceMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Run extraction on the blocking pool, bounded by the configured timeout.
    ///
    /// A timed-out extraction is abandoned, not cancelled: its blocking thread runs until the
    /// parser returns.
    async fn extract_text(
        &self,
        bytes: Vec<u8>,
        mime_type: crate::ingest::MimeType,
    ) -> Result<(Vec<u8>, String), ServiceError> {
        let limit = self.settings.extraction_timeout;
        let task = tokio::task::spawn_blocking(move || {
            let result = extract(&bytes, mime_type);
            (bytes, result)
        });

        match tokio::time::timeout(limit, task).await {
            Err(_) => Err(ServiceError::ExtractionTimedOut(limit)),
            Ok(Err(join_error)) => Err(ServiceError::MalformedDocument(format!(
                "extraction aborted: {join_error}"
            ))),
            Ok(Ok((_, Err(ExtractionError::Encrypted)))) => Err(ServiceError::EncryptedDocument),
            Ok(Ok((_, Err(ExtractionError::Malformed(reason))))) => {
                Err(ServiceError::MalformedDocument(reason))
            }
            Ok(Ok((bytes, Ok(text)))) => Ok((bytes, text)),
        }
    }

    async fn store_upload(
        &self,
        owner: &Identity,
        filename: String,
        declared_mime_type: Option<String>,
        bytes: Vec<u8>,
    ) -> Result<Document, ServiceError> {
        if bytes.len() > MAX_UPLOAD_BYTES {
            return Err(ServiceError::too_large(bytes.len()));
        }
        let mime_type = sniff(&bytes).ok_or(ServiceError::UnsupportedType)?;
        let (bytes, extracted_text) = self.extract_text(bytes, mime_type).await?;

        let document = NewDocument {
            owner: owner.clone(),
            filename,
            mime_type,
            declared_mime_type: sanitize_declared_type(declared_mime_type),
            extracted_text,
        };
        Ok(self.store.create_document(document, &bytes).await?)
    }

    async fn generate_answer(&self, context: &str, question: &str) -> GeneratedAnswer {
        let Some(generator) = &self.generator else {
            return GeneratedAnswer {
                text: UNCONFIGURED_ANSWER.to_string(),
                source: AnswerSource::Unconfigured,
                latency_ms: None,
                tokens_used: None,
            };
        };

        let request = GenerationRequest {
            context: context.to_string(),
            question: question.to_string(),
        };
        let started = Instant::now();
        let outcome =
            tokio::time::timeout(self.settings.generation_timeout, generator.generate(request))
                .await;
        let latency_ms = Some(started.elapsed().as_millis() as i64);

        match outcome {
            Ok(Ok(output)) if output.text.trim().is_empty() => GeneratedAnswer {
                text: NO_ANSWER.to_string(),
                source: AnswerSource::Empty,
                latency_ms,
                tokens_used: output.tokens_used,
            },
            Ok(Ok(output)) => GeneratedAnswer {
                text: output.text,
                source: AnswerSource::Model,
                latency_ms,
                tokens_used: output.tokens_used,
            },
            Ok(Err(error)) => {
                tracing::warn!(error = %error, "Generation failed; returning error answer");
                GeneratedAnswer {
                    text: format!("{GENERATION_ERROR_PREFIX}{error}"),
                    source: AnswerSource::ProviderError,
                    latency_ms,
                    tokens_used: None,
                }
            }
            Err(_) => {
                let limit = self.settings.generation_timeout;
                tracing::warn!(timeout = ?limit, "Generation timed out; returning error answer");
                GeneratedAnswer {
                    text: format!("{GENERATION_ERROR_PREFIX}generation timed out after {limit:?}"),
                    source: AnswerSource::ProviderError,
                    latency_ms,
                    tokens_used: None,
                }
            }
        }
    }
}

struct GeneratedAnswer {
    text: String,
    source: AnswerSource,
    latency_ms: Option<i64>,
    tokens_used: Option<i64>,
}

/// Leading [`MAX_QUESTION_CHARS`] characters of `question`, cut on a character boundary.
fn prompt_question(question: &str) -> &str {
    match question.char_indices().nth(MAX_QUESTION_CHARS) {
        Some((end, _)) => &question[..end],
        None => question,
    }
}

#[async_trait]
impl DocumentApi for DocumentService {
    async fn upload(
        &self,
        owner: &Identity,
        request: UploadRequest,
    ) -> Result<Document, ServiceError> {
        let UploadRequest {
            filename,
            declared_mime_type,
            bytes,
        } = request;
        let byte_size = bytes.len();
        let filename = sanitize_filename(&filename);
        tracing::info!(owner = %owner, filename = %filename, byte_size, "Processing upload");

        let result = self
            .store_upload(owner, filename, declared_mime_type, bytes)
            .await;

        match &result {
            Ok(document) => {
                self.metrics.record_upload(byte_size as u64);
                tracing::info!(
                    owner = %owner,
                    document_id = document.id,
                    mime_type = %document.mime_type,
                    text_chars = document.extracted_text.chars().count(),
                    "Document stored"
                );
            }
            Err(ServiceError::Store(error)) => {
                tracing::error!(owner = %owner, error = %error, "Failed to store upload");
            }
            Err(error) => {
                self.metrics.record_rejected_upload();
                tracing::info!(owner = %owner, byte_size, reason = %error, "Upload rejected");
            }
        }
        result
    }

    async fn ask(
        &self,
        owner: &Identity,
        document_id: DocumentId,
        question: &str,
    ) -> Result<Answer, ServiceError> {
        let document = self.store.get_document(owner, document_id).await?;
        let context = build_context(&document, self.settings.context_max_chars);
        tracing::debug!(
            owner = %owner,
            document_id,
            context_chars = context.chars().count(),
            "Built generation context"
        );

        let generated = self
            .generate_answer(context, prompt_question(question))
            .await;
        let history = self
            .store
            .record_answer(NewHistoryEntry {
                owner: owner.clone(),
                document_id,
                question: question.to_string(),
                answer: generated.text.clone(),
                latency_ms: generated.latency_ms,
                tokens_used: generated.tokens_used,
            })
            .await?;

        self.metrics.record_answer(generated.source.is_fallback());
        tracing::info!(
            owner = %owner,
            document_id,
            history_id = history.id,
            source = ?generated.source,
            latency_ms = generated.latency_ms,
            tokens_used = generated.tokens_used,
            "Question answered"
        );

        Ok(Answer {
            text: generated.text,
            source: generated.source,
            history,
        })
    }

    async fn history(&self, owner: &Identity) -> Result<Vec<HistoryEntry>, ServiceError> {
        let entries = self.store.list_history(owner).await?;
        tracing::debug!(owner = %owner, entries = entries.len(), "Listed history");
        Ok(entries)
    }

    async fn documents(&self, owner: &Identity) -> Result<Vec<DocumentSummary>, ServiceError> {
        Ok(self.store.list_documents(owner).await?)
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}
