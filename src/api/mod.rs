//! HTTP surface for smartdoc.
//!
//! This module exposes a compact Axum router:
//!
//! - `POST /upload` – Multipart upload (field `file`) of a plain-text or PDF document. The type is
//!   decided by content sniffing; the declared content type is kept for traceability only.
//! - `POST /ask` – `{document_id, question}`; answers from the document's leading text and
//!   records the exchange in the caller's history.
//! - `GET /history` – The caller's question/answer history, newest first.
//! - `GET /documents` – The caller's documents, newest first.
//! - `GET /health` – Liveness probe.
//! - `GET /metrics` – Upload and question counters.
//!
//! The first four require a bearer token and pass through per-client admission control keyed by
//! peer address and path.

mod error;

pub use error::AppError;

use crate::{
    auth::{Identity, TokenAuthority},
    config::RateLimitConfig,
    ingest::MAX_UPLOAD_BYTES,
    metrics::ServiceMetrics,
    qa::{DocumentApi, ServiceError, UploadRequest},
    ratelimit::{Admission, RateKey, RateLimiter},
    store::{DocumentId, DocumentSummary, HistoryEntry},
};
use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{
        ConnectInfo, DefaultBodyLimit, FromRequestParts, Multipart, Request, State,
        multipart::MultipartError, rejection::JsonRejection,
    },
    http::{
        HeaderValue, Method, StatusCode,
        header::{AUTHORIZATION, CONTENT_TYPE},
        request::Parts,
    },
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tower_http::cors::{AllowOrigin, CorsLayer};

/// Slack above the upload limit for multipart framing.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Collaborators the router needs besides the document service.
#[derive(Clone)]
pub struct ApiContext {
    /// Validates bearer tokens.
    pub tokens: Arc<dyn TokenAuthority>,
    /// Admission controller shared by all throttled routes.
    pub limiter: Arc<RateLimiter>,
    /// Limits per operation path.
    pub rate_limits: Arc<RateLimitConfig>,
    /// Counters updated by the HTTP layer itself.
    pub metrics: Arc<ServiceMetrics>,
    /// Origins allowed by CORS.
    pub allowed_origins: Vec<String>,
}

struct AppState<S> {
    service: Arc<S>,
    context: ApiContext,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            context: self.context.clone(),
        }
    }
}

/// Build the HTTP router exposing the document API surface.
pub fn create_router<S>(service: Arc<S>, context: ApiContext) -> Router
where
    S: DocumentApi + 'static,
{
    let cors = cors_layer(&context.allowed_origins);
    let state = AppState { service, context };

    let throttled = Router::new()
        .route(
            "/upload",
            post(upload_document::<S>)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + MULTIPART_OVERHEAD)),
        )
        .route("/ask", post(ask_question::<S>))
        .route("/history", get(get_history::<S>))
        .route("/documents", get(list_documents::<S>))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            enforce_rate_limit::<S>,
        ));

    Router::new()
        .merge(throttled)
        .route("/health", get(health))
        .route("/metrics", get(get_metrics::<S>))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
}

/// Admission control for throttled routes, keyed by peer IP and request path.
async fn enforce_rate_limit<S>(
    State(state): State<AppState<S>>,
    request: Request,
    next: Next,
) -> Response
where
    S: DocumentApi + 'static,
{
    let operation = request.uri().path().to_string();
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let limits = state.context.rate_limits.limits_for(&operation);
    let key = RateKey::new(client, operation);
    match state.context.limiter.admit(&key, limits).await {
        Admission::Allowed => next.run(request).await,
        Admission::Denied { retry_after } => {
            state.context.metrics.record_rate_limited();
            AppError::rate_limited(retry_after).into_response()
        }
    }
}

/// Identity proven by a valid bearer token.
struct Authenticated(Identity);

#[async_trait]
impl<S> FromRequestParts<AppState<S>> for Authenticated
where
    S: DocumentApi + 'static,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState<S>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::unauthorized("missing bearer token"))?;
        let token = header
            .split_once(' ')
            .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
            .map(|(_, token)| token.trim())
            .ok_or_else(|| AppError::unauthorized("authorization scheme must be Bearer"))?;

        state
            .context
            .tokens
            .validate(token)
            .map(Authenticated)
            .map_err(|error| {
                tracing::debug!(error = %error, "Rejected bearer token");
                AppError::unauthorized("invalid or expired token")
            })
    }
}

/// Response body for a stored or listed document.
#[derive(Serialize)]
struct DocumentResponse {
    id: DocumentId,
    filename: String,
    mime_type: &'static str,
    byte_size: i64,
    created_at: String,
}

impl TryFrom<DocumentSummary> for DocumentResponse {
    type Error = AppError;

    fn try_from(summary: DocumentSummary) -> Result<Self, Self::Error> {
        Ok(Self {
            id: summary.id,
            filename: summary.filename,
            mime_type: summary.mime_type.as_str(),
            byte_size: summary.byte_size,
            created_at: rfc3339(summary.created_at)?,
        })
    }
}

/// Accept a multipart upload and store it for the caller.
async fn upload_document<S>(
    State(state): State<AppState<S>>,
    Authenticated(identity): Authenticated,
    mut multipart: Multipart,
) -> Result<Json<DocumentResponse>, AppError>
where
    S: DocumentApi,
{
    let request = read_upload(&mut multipart).await?;
    let document = state.service.upload(&identity, request).await?;
    DocumentResponse::try_from(DocumentSummary::from(&document)).map(Json)
}

/// Pull the `file` field out of the multipart body, refusing to buffer past the upload limit.
async fn read_upload(multipart: &mut Multipart) -> Result<UploadRequest, AppError> {
    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let declared_mime_type = field.content_type().map(str::to_string);
        let mut bytes = Vec::new();
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            bytes.extend_from_slice(&chunk);
            if bytes.len() > MAX_UPLOAD_BYTES {
                return Err(ServiceError::too_large(bytes.len()).into());
            }
        }

        return Ok(UploadRequest {
            filename,
            declared_mime_type,
            bytes,
        });
    }
    Err(AppError::bad_request("multipart field 'file' is required"))
}

fn multipart_error(error: MultipartError) -> AppError {
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ServiceError::too_large(MAX_UPLOAD_BYTES + 1).into()
    } else {
        AppError::bad_request(format!("invalid multipart body: {error}"))
    }
}

/// Request body for `POST /ask`.
#[derive(Deserialize)]
struct AskRequest {
    document_id: DocumentId,
    question: String,
}

/// Response body for `POST /ask`.
#[derive(Serialize)]
struct AskResponse {
    answer: String,
}

/// Answer a question about one of the caller's documents.
async fn ask_question<S>(
    State(state): State<AppState<S>>,
    Authenticated(identity): Authenticated,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Json<AskResponse>, AppError>
where
    S: DocumentApi,
{
    let Json(request) = payload.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
    let answer = state
        .service
        .ask(&identity, request.document_id, &request.question)
        .await?;
    Ok(Json(AskResponse {
        answer: answer.text,
    }))
}

/// Response item for `GET /history`.
#[derive(Serialize)]
struct HistoryResponse {
    id: i64,
    document_id: DocumentId,
    question: String,
    answer: String,
    created_at: String,
}

impl TryFrom<HistoryEntry> for HistoryResponse {
    type Error = AppError;

    fn try_from(entry: HistoryEntry) -> Result<Self, Self::Error> {
        Ok(Self {
            id: entry.id,
            document_id: entry.document_id,
            question: entry.question,
            answer: entry.answer,
            created_at: rfc3339(entry.created_at)?,
        })
    }
}

/// Return the caller's question/answer history.
async fn get_history<S>(
    State(state): State<AppState<S>>,
    Authenticated(identity): Authenticated,
) -> Result<Json<Vec<HistoryResponse>>, AppError>
where
    S: DocumentApi,
{
    let entries = state.service.history(&identity).await?;
    entries
        .into_iter()
        .map(HistoryResponse::try_from)
        .collect::<Result<Vec<_>, _>>()
        .map(Json)
}

/// Return the caller's documents.
async fn list_documents<S>(
    State(state): State<AppState<S>>,
    Authenticated(identity): Authenticated,
) -> Result<Json<Vec<DocumentResponse>>, AppError>
where
    S: DocumentApi,
{
    let documents = state.service.documents(&identity).await?;
    documents
        .into_iter()
        .map(DocumentResponse::try_from)
        .collect::<Result<Vec<_>, _>>()
        .map(Json)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

/// Return upload and question counters.
async fn get_metrics<S>(State(state): State<AppState<S>>) -> impl IntoResponse
where
    S: DocumentApi,
{
    Json(state.service.metrics_snapshot())
}

fn rfc3339(timestamp: OffsetDateTime) -> Result<String, AppError> {
    timestamp.format(&Rfc3339).map_err(AppError::internal)
}
