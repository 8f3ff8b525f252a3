//! Text extraction for sniffed uploads.
//!
//! Plain text is decoded lossily. PDFs are rejected up front when encrypted; otherwise each page
//! is extracted on its own and a failing page contributes an empty segment, so one corrupt page
//! never costs the rest of the document.

use super::sanitize::{
    decode_utf16_dropping_unpaired, decode_utf8_discarding, sanitize_extracted_text,
};
use super::types::{ExtractionError, MimeType};
use std::fmt::Display;
use std::panic::{AssertUnwindSafe, catch_unwind};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const UTF16_LE_BOM: &[u8] = &[0xFF, 0xFE];
const UTF16_BE_BOM: &[u8] = &[0xFE, 0xFF];
const ENCRYPT_KEY: &[u8] = b"/Encrypt";
const STARTXREF: &[u8] = b"startxref";
/// Bytes scanned for a trailer when `startxref` is missing or unusable.
const TRAILER_FALLBACK_WINDOW: usize = 4096;
/// Separator placed between page segments.
pub const PAGE_SEPARATOR: &str = "\n";

/// Extract text from `bytes` already classified as `mime_type`.
///
/// Empty text is a valid result. The returned text has been passed through
/// [`sanitize_extracted_text`].
pub fn extract(bytes: &[u8], mime_type: MimeType) -> Result<String, ExtractionError> {
    match mime_type {
        MimeType::PlainText => Ok(decode_plain_text(bytes)),
        MimeType::Pdf => extract_pdf(bytes),
    }
}

fn decode_plain_text(bytes: &[u8]) -> String {
    let decoded = if let Some(rest) = bytes.strip_prefix(UTF16_LE_BOM) {
        decode_utf16_dropping_unpaired(rest, false)
    } else if let Some(rest) = bytes.strip_prefix(UTF16_BE_BOM) {
        decode_utf16_dropping_unpaired(rest, true)
    } else {
        decode_utf8_discarding(bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes))
    };
    sanitize_extracted_text(&decoded)
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractionError> {
    if declares_encryption(bytes) {
        return Err(ExtractionError::Encrypted);
    }

    let document = catch_unwind(|| lopdf::Document::load_mem(bytes))
        .map_err(|_| ExtractionError::Malformed("PDF parser panicked".into()))?
        .map_err(|error| ExtractionError::Malformed(error.to_string()))?;

    if document.is_encrypted() {
        return Err(ExtractionError::Encrypted);
    }

    let page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
    tracing::debug!(pages = page_numbers.len(), "Extracting PDF text");

    let pages = page_numbers.iter().map(|&page_number| {
        catch_unwind(AssertUnwindSafe(|| document.extract_text(&[page_number])))
            .map_err(|_| "page extraction panicked".to_string())
            .and_then(|page| page.map_err(|error| error.to_string()))
    });
    Ok(fold_pages(pages))
}

/// Fold per-page extraction results into one text, in page order.
///
/// A failed page becomes an empty segment. Trailing line breaks are trimmed from each page and
/// segments are joined with [`PAGE_SEPARATOR`]; line breaks inside a page are kept.
pub fn fold_pages<E, I>(pages: I) -> String
where
    E: Display,
    I: IntoIterator<Item = Result<String, E>>,
{
    pages
        .into_iter()
        .enumerate()
        .map(|(index, page)| match page {
            Ok(text) => {
                let text = sanitize_extracted_text(&text);
                text.trim_end_matches(['\r', '\n']).to_string()
            }
            Err(error) => {
                tracing::warn!(page = index + 1, error = %error, "Page extraction failed; using empty segment");
                String::new()
            }
        })
        .collect::<Vec<_>>()
        .join(PAGE_SEPARATOR)
}

/// Whether the final trailer (or cross-reference stream dictionary) declares `/Encrypt`.
///
/// This runs before the parser so that no decryption, not even with an empty password, is ever
/// attempted.
fn declares_encryption(bytes: &[u8]) -> bool {
    let Some(marker) = rfind(bytes, STARTXREF) else {
        let start = bytes.len().saturating_sub(TRAILER_FALLBACK_WINDOW);
        return find(&bytes[start..], ENCRYPT_KEY).is_some();
    };

    let start = parse_offset(&bytes[marker + STARTXREF.len()..])
        .filter(|offset| *offset < marker)
        .unwrap_or_else(|| marker.saturating_sub(TRAILER_FALLBACK_WINDOW));
    find(&bytes[start..marker], ENCRYPT_KEY).is_some()
}

fn parse_offset(bytes: &[u8]) -> Option<usize> {
    let digits: Vec<u8> = bytes
        .iter()
        .copied()
        .skip_while(u8::is_ascii_whitespace)
        .take_while(u8::is_ascii_digit)
        .collect();
    std::str::from_utf8(&digits).ok()?.parse().ok()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .rposition(|window| window == needle)
}
