//! Approximate token counting for chunk sizing.
//!
//! Counts are taken with the `cl100k_base` BPE vocabulary. The counts only
//! drive sizing decisions; they do not need to match the embedding model's
//! own tokenizer exactly. If the vocabulary cannot be loaded the counter
//! falls back to a 4 chars/token estimate.

use once_cell::sync::Lazy;
use tiktoken_rs::CoreBPE;

/// Approximate characters-per-token ratio used by the fallback estimate.
pub const CHARS_PER_TOKEN: usize = 4;

static BPE: Lazy<Option<CoreBPE>> = Lazy::new(|| match tiktoken_rs::cl100k_base() {
    Ok(bpe) => Some(bpe),
    Err(e) => {
        tracing::warn!(
            "Failed to load cl100k_base vocabulary: {}, falling back to estimation",
            e
        );
        None
    }
});

/// Count tokens in `text`.
pub fn count_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    match BPE.as_ref() {
        Some(bpe) => bpe.encode_ordinary(text).len(),
        None => estimate_tokens(text),
    }
}

/// Character-based estimate: roughly one token per four characters.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}
