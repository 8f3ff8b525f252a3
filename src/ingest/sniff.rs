//! Content-based type detection.

use super::types::MimeType;

/// Number of leading bytes inspected when classifying an upload.
pub const SNIFF_PREFIX_LEN: usize = 2048;

const PDF_MAGIC: &[u8] = b"%PDF-";
const UTF16_LE_BOM: &[u8] = &[0xFF, 0xFE];
const UTF16_BE_BOM: &[u8] = &[0xFE, 0xFF];

/// Formats that must never pass as text even when their header happens to be printable.
const BINARY_SIGNATURES: &[&[u8]] = &[
    b"\x89PNG\r\n\x1a\n",
    b"\xFF\xD8\xFF",
    b"GIF87a",
    b"GIF89a",
    b"PK\x03\x04",
    b"\x1F\x8B",
    b"\x7FELF",
];

/// Classify an upload from its leading bytes.
///
/// Only the first [`SNIFF_PREFIX_LEN`] bytes are consulted. Returns `None` for anything outside
/// the accepted set, including empty payloads.
pub fn sniff(prefix: &[u8]) -> Option<MimeType> {
    let prefix = &prefix[..prefix.len().min(SNIFF_PREFIX_LEN)];

    if prefix.starts_with(PDF_MAGIC) {
        return Some(MimeType::Pdf);
    }
    if BINARY_SIGNATURES.iter().any(|magic| prefix.starts_with(magic)) {
        return None;
    }
    if prefix.starts_with(UTF16_LE_BOM) || prefix.starts_with(UTF16_BE_BOM) {
        return Some(MimeType::PlainText);
    }
    if !prefix.is_empty() && prefix.iter().copied().all(is_text_byte) {
        return Some(MimeType::PlainText);
    }
    None
}

fn is_text_byte(byte: u8) -> bool {
    // High bytes are allowed: UTF-8 sequences and legacy 8-bit encodings are both text.
    matches!(byte, b'\t' | b'\n' | b'\r' | 0x0C | 0x1B) || (byte >= 0x20 && byte != 0x7F)
}
