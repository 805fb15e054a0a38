//! The closed backreference lexicon used by the `explicit-backref`
//! extractor.

/// Phrases whose presence in a later chunk's text counts as an
/// `explicit-backref` transition from the earlier chunk.
pub const BACKREF_PHRASES: &[&str] = &[
    "the error",
    "that function",
    "you said",
    "as mentioned",
    "like before",
    "same issue",
    "this bug",
    "that file",
    "the previous",
    "earlier you",
];

/// Whether `text` (already lowercased by the caller) contains any closed
/// backreference phrase.
#[must_use]
pub fn contains_backref(text_lowercase: &str) -> bool {
    BACKREF_PHRASES.iter().any(|p| text_lowercase.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_known_phrase() {
        assert!(contains_backref("i think the error is in main.rs"));
    }

    #[test]
    fn rejects_unrelated_text() {
        assert!(!contains_backref("let's add a new feature"));
    }
}
