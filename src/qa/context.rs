//! Bounded context selection for generation calls.

use crate::store::Document;

/// Leading `max_chars` characters of the document's extracted text.
///
/// Counts characters, not bytes, so multi-byte text is never split mid-character. Text beyond
/// the prefix is never seen by the model.
pub fn build_context(document: &Document, max_chars: usize) -> &str {
    prefix_chars(&document.extracted_text, max_chars)
}

fn prefix_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Identity;
    use crate::ingest::MimeType;
    use crate::store::StorageReference;
    use time::OffsetDateTime;

    fn document(text: &str) -> Document {
        Document {
            id: 1,
            owner: Identity::new("alice"),
            filename: "note.txt".into(),
            mime_type: MimeType::PlainText,
            declared_mime_type: None,
            byte_size: text.len() as i64,
            storage_reference: StorageReference::generate("note.txt"),
            extracted_text: text.into(),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn short_text_is_used_whole() {
        assert_eq!(build_context(&document("hello world"), 500), "hello world");
        assert_eq!(build_context(&document(""), 500), "");
    }

    #[test]
    fn long_text_is_cut_to_the_prefix() {
        let text = "a".repeat(600);
        assert_eq!(build_context(&document(&text), 500).len(), 500);
    }

    #[test]
    fn cut_respects_character_boundaries() {
        let text = "é".repeat(10);
        let doc = document(&text);
        let context = build_context(&doc, 3);
        assert_eq!(context, "ééé");
        assert_eq!(context.chars().count(), 3);
    }

    #[test]
    fn zero_budget_yields_empty_context() {
        assert_eq!(build_context(&document("hello"), 0), "");
    }
}
