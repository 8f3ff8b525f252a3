//! Upload ingestion: content sniffing, text extraction, and input sanitization.

pub mod extract;
pub mod sanitize;
pub mod sniff;
pub mod types;

pub use extract::extract;
pub use sniff::{SNIFF_PREFIX_LEN, sniff};
pub use types::{ExtractionError, MimeType, UnknownMimeType};

/// Largest accepted upload, in bytes (10 MiB).
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
