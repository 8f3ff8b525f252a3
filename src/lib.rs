#![deny(missing_docs)]

//! Core library for the smartdoc document question-answering server.

/// HTTP routing and REST handlers.
pub mod api;
/// Bearer token issuance and validation.
pub mod auth;
/// Environment-driven configuration management.
pub mod config;
/// Answer generation provider abstraction and adapters.
pub mod generation;
/// Upload sniffing, text extraction, and sanitization.
pub mod ingest;
/// Structured logging and tracing setup.
pub mod logging;
/// Service counters.
pub mod metrics;
/// Question answering and history over stored documents.
pub mod qa;
/// Per-client admission control.
pub mod ratelimit;
/// Tenant-scoped document and history persistence.
pub mod store;
