//! Word-boundary text chunker.
//!
//! Splits comment body text into chunks of at most `size` characters without
//! splitting inside a word: the text is tokenized on whitespace and words are
//! greedily packed until the next one would overflow the limit. A single word
//! longer than `size` becomes its own oversized chunk rather than being cut.

/// Split text into word-boundary chunks of roughly `size` characters.
///
/// Empty or all-whitespace input yields zero chunks; callers treat that as
/// "nothing to ingest" rather than an error.
pub fn split_text(text: &str, size: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let would_be = if current.is_empty() {
            word.len()
        } else {
            current.len() + 1 + word.len()
        };

        if would_be > size && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }

        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}
