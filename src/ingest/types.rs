//! Content types and error definitions for the ingestion pipeline.

use std::fmt;
use thiserror::Error;

/// Content types accepted for upload, as determined by sniffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MimeType {
    /// `text/plain` (UTF-8, or UTF-16 with a byte-order mark).
    PlainText,
    /// `application/pdf`.
    Pdf,
}

impl MimeType {
    /// Canonical MIME string.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PlainText => "text/plain",
            Self::Pdf => "application/pdf",
        }
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MimeType {
    type Err = UnknownMimeType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text/plain" => Ok(Self::PlainText),
            "application/pdf" => Ok(Self::Pdf),
            other => Err(UnknownMimeType(other.to_string())),
        }
    }
}

/// A stored MIME string outside the accepted set.
#[derive(Debug, Error)]
#[error("unknown mime type '{0}'")]
pub struct UnknownMimeType(pub String);

/// Errors produced while turning uploaded bytes into text.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The PDF requires a password; no extraction is attempted.
    #[error("document is encrypted")]
    Encrypted,
    /// The document could not be parsed at all.
    #[error("malformed document: {0}")]
    Malformed(String),
}
