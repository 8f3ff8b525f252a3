//! Helpers for normalizing untrusted text and metadata.

/// Longest filename kept, in bytes.
const MAX_FILENAME_BYTES: usize = 255;
/// Longest client-declared content type kept, in bytes.
const MAX_DECLARED_TYPE_BYTES: usize = 100;
/// Name used when the client supplies nothing usable.
const FALLBACK_FILENAME: &str = "upload";

/// Sanitize arbitrary string input by trimming whitespace and dropping empties.
pub(crate) fn sanitize_string(value: Option<String>) -> Option<String> {
    value.and_then(|input| {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Normalize a client-declared content type; kept for traceability only.
pub fn sanitize_declared_type(value: Option<String>) -> Option<String> {
    sanitize_string(value).map(|declared| {
        let cleaned: String = declared.chars().filter(|c| !c.is_control()).collect();
        truncate_to_boundary(&cleaned, MAX_DECLARED_TYPE_BYTES).to_string()
    })
}

/// Reduce a client-supplied filename to a safe basename.
///
/// Directory components, control characters and characters reserved on common filesystems are
/// removed; the result is capped at 255 bytes and never empty.
pub fn sanitize_filename(raw: &str) -> String {
    let basename = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = basename
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, '<' | '>' | ':' | '"' | '|' | '?' | '*'))
        .collect();
    let trimmed = cleaned.trim().trim_start_matches('.');
    let bounded = truncate_to_boundary(trimmed, MAX_FILENAME_BYTES).trim_end();

    if bounded.is_empty() {
        FALLBACK_FILENAME.to_string()
    } else {
        bounded.to_string()
    }
}

/// Decode UTF-8, discarding undecodable byte sequences instead of failing.
///
/// Surrogate code points encoded as three-byte sequences are invalid UTF-8 and are discarded
/// with everything else that fails to decode.
pub fn decode_utf8_discarding(bytes: &[u8]) -> String {
    bytes.utf8_chunks().map(|chunk| chunk.valid()).collect()
}

/// Decode UTF-16 code units, dropping unpaired surrogates.
///
/// A trailing odd byte is ignored.
pub fn decode_utf16_dropping_unpaired(bytes: &[u8], big_endian: bool) -> String {
    let units = bytes.chunks_exact(2).map(|pair| {
        let pair = [pair[0], pair[1]];
        if big_endian {
            u16::from_be_bytes(pair)
        } else {
            u16::from_le_bytes(pair)
        }
    });
    char::decode_utf16(units).filter_map(Result::ok).collect()
}

/// Final cleanup applied to all extracted text before it is stored.
///
/// Decoders substitute U+FFFD for unpaired surrogates and other garbage; those substitutes and
/// NUL characters are removed so they never reach storage or the generation prompt.
pub fn sanitize_extracted_text(text: &str) -> String {
    text.chars()
        .filter(|c| *c != char::REPLACEMENT_CHARACTER && *c != '\0')
        .collect()
}

fn truncate_to_boundary(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }
    let mut end = max_bytes;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}
