//! Token-aware text chunker with overlap.
//!
//! Splits document text into [`TextChunk`]s that stay near a target size
//! and never exceed a hard maximum.
//!
//! # Algorithm
//!
//! 1. Split text on blank-line boundaries into paragraphs.
//! 2. Accumulate paragraphs into a buffer. When the next paragraph would push
//!    the buffer over `max_tokens`, close the chunk. Once the buffer reaches
//!    `target_tokens`, close it early.
//! 3. Every closed chunk seeds the next buffer with its trailing
//!    ~`overlap_tokens` worth of whitespace-delimited words. The seed is
//!    dropped when seed + next unit would exceed `max_tokens`.
//! 4. A paragraph over `max_tokens` is split at sentence ends (`.`, `!`, `?`
//!    followed by whitespace) and fed through the same accumulator.
//! 5. A sentence over `max_tokens` is cut into character windows sized to
//!    `target_tokens` (using the sentence's average chars/token), stepping
//!    back `overlap_tokens` between windows. Windows still over the maximum
//!    are shrunk by a quarter until they fit.
//! 6. A trailing chunk under `min_tokens` is merged into its predecessor
//!    when the merged text fits in `max_tokens`; otherwise it is kept.
//!
//! Whitespace-only input produces no chunks. Only whitespace between units
//! is normalised; every other character of the input appears in the
//! non-overlapping part ([`TextChunk::fresh_text`]) of exactly one chunk.
//!
//! # Example
//!
//! ```rust
//! use context_ingest::chunk::{chunk_text, ChunkConfig};
//!
//! let chunks = chunk_text("Hello world.\n\nSecond paragraph.", "notes.md", &ChunkConfig::default());
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].chunk_index, 0);
//! ```

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{ChunkSource, TextChunk};
use crate::tokenizer::count_tokens;

const PARAGRAPH_SEP: &str = "\n\n";
const SENTENCE_SEP: &str = " ";

static PARAGRAPH_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n[ \t\r]*\n").expect("Invalid regex"));
static SENTENCE_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?]\s+").expect("Invalid regex"));

/// Token budgets for the chunker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    pub target_tokens: usize,
    pub max_tokens: usize,
    pub min_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            target_tokens: 500,
            max_tokens: 700,
            min_tokens: 200,
            overlap_tokens: 75,
        }
    }
}

/// Split `text` into overlapping chunks for `source_path`.
///
/// Indices are contiguous from 0. No chunk exceeds `max_tokens`.
pub fn chunk_text(text: &str, source_path: &str, config: &ChunkConfig) -> Vec<TextChunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let mut acc = Accumulator::new(config);
    for para in PARAGRAPH_BREAK.split(text) {
        let para = trim_blank_lines(para);
        if para.is_empty() {
            continue;
        }
        acc.push_paragraph(para);
    }

    let pieces = acc.finish();

    let mut chunks = Vec::with_capacity(pieces.len());
    let mut cursor = 0usize;
    for (index, piece) in pieces.into_iter().enumerate() {
        let token_count = count_tokens(&piece.text);
        let overlap = count_tokens(&piece.text[..piece.overlap_prefix]);
        let fresh = token_count.saturating_sub(overlap);
        let start_token = cursor.saturating_sub(overlap);
        let end_token = cursor + fresh;
        cursor = end_token;

        chunks.push(TextChunk {
            text: piece.text,
            chunk_index: index,
            token_count,
            source: ChunkSource {
                source_path: source_path.to_string(),
                start_token,
                end_token,
            },
            overlap_prefix: piece.overlap_prefix,
        });
    }

    chunks
}

/// A closed chunk before indices and offsets are assigned.
#[derive(Debug)]
struct Piece {
    text: String,
    overlap_prefix: usize,
}

struct Accumulator<'c> {
    config: &'c ChunkConfig,
    pieces: Vec<Piece>,
    buf: String,
    buf_tokens: usize,
    /// Bytes at the start of `buf` copied from the previous chunk.
    overlap_prefix: usize,
    /// `buf` holds content that has not been emitted yet.
    fresh: bool,
}

impl<'c> Accumulator<'c> {
    fn new(config: &'c ChunkConfig) -> Self {
        Self {
            config,
            pieces: Vec::new(),
            buf: String::new(),
            buf_tokens: 0,
            overlap_prefix: 0,
            fresh: false,
        }
    }

    fn push_paragraph(&mut self, para: &str) {
        if count_tokens(para) <= self.config.max_tokens {
            self.push_unit(para, PARAGRAPH_SEP);
            return;
        }

        for (i, sentence) in split_sentences(para).into_iter().enumerate() {
            let sep = if i == 0 { PARAGRAPH_SEP } else { SENTENCE_SEP };
            if count_tokens(sentence) <= self.config.max_tokens {
                self.push_unit(sentence, sep);
            } else {
                self.push_windows(sentence);
            }
        }
    }

    fn push_unit(&mut self, unit: &str, sep: &str) {
        let max = self.config.max_tokens;

        if !self.buf.is_empty() && self.tokens_with(unit, sep) > max {
            if self.fresh {
                self.close();
            }
            if !self.buf.is_empty() && self.tokens_with(unit, sep) > max {
                self.reset();
            }
        }

        if !self.buf.is_empty() {
            self.buf.push_str(sep);
        }
        self.buf.push_str(unit);
        self.buf_tokens = count_tokens(&self.buf);
        self.fresh = true;

        if self.buf_tokens >= self.config.target_tokens {
            self.close();
        }
    }

    /// Emit an unsplittable sentence as approximate character windows.
    fn push_windows(&mut self, sentence: &str) {
        if self.fresh {
            self.close();
        }
        self.reset();

        let mut prev_end: usize = 0;
        for (start, end) in split_windows(sentence, self.config) {
            self.pieces.push(Piece {
                text: sentence[start..end].to_string(),
                overlap_prefix: prev_end.saturating_sub(start),
            });
            prev_end = end;
        }

        if let Some(last) = self.pieces.last() {
            let seed = overlap_tail(&last.text, self.config.overlap_tokens).to_string();
            self.seed(seed);
        }
    }

    fn tokens_with(&self, unit: &str, sep: &str) -> usize {
        let mut candidate = String::with_capacity(self.buf.len() + sep.len() + unit.len());
        candidate.push_str(&self.buf);
        candidate.push_str(sep);
        candidate.push_str(unit);
        count_tokens(&candidate)
    }

    fn close(&mut self) {
        if !self.fresh {
            return;
        }
        let seed = overlap_tail(&self.buf, self.config.overlap_tokens).to_string();
        let text = std::mem::take(&mut self.buf);
        self.pieces.push(Piece {
            text,
            overlap_prefix: self.overlap_prefix,
        });
        self.seed(seed);
    }

    fn seed(&mut self, seed: String) {
        self.overlap_prefix = seed.len();
        self.buf_tokens = count_tokens(&seed);
        self.buf = seed;
        self.fresh = false;
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.buf_tokens = 0;
        self.overlap_prefix = 0;
        self.fresh = false;
    }

    fn finish(mut self) -> Vec<Piece> {
        if self.fresh {
            let text = std::mem::take(&mut self.buf);
            self.pieces.push(Piece {
                text,
                overlap_prefix: self.overlap_prefix,
            });
        }
        self.merge_short_tail();
        self.pieces
    }

    fn merge_short_tail(&mut self) {
        if self.pieces.len() < 2 {
            return;
        }
        let last_tokens = self
            .pieces
            .last()
            .map(|p| count_tokens(&p.text))
            .unwrap_or(0);
        if last_tokens >= self.config.min_tokens {
            return;
        }

        let Some(last) = self.pieces.pop() else {
            return;
        };
        let Some(prev) = self.pieces.last_mut() else {
            self.pieces.push(last);
            return;
        };

        let merged = if last.overlap_prefix == 0 {
            format!("{}{}{}", prev.text, PARAGRAPH_SEP, last.text)
        } else {
            format!("{}{}", prev.text, &last.text[last.overlap_prefix..])
        };

        if count_tokens(&merged) <= self.config.max_tokens {
            prev.text = merged;
        } else {
            self.pieces.push(last);
        }
    }
}

/// Drop whitespace-only lines around a paragraph and trailing whitespace.
/// Indentation of the first content line is kept.
fn trim_blank_lines(para: &str) -> &str {
    let mut start = 0;
    for line in para.split_inclusive('\n') {
        if !line.trim().is_empty() {
            break;
        }
        start += line.len();
    }
    para[start..].trim_end()
}

/// Split a paragraph after `.`, `!` or `?` followed by whitespace.
fn split_sentences(paragraph: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for m in SENTENCE_END.find_iter(paragraph) {
        let end = m.start() + 1;
        let sentence = paragraph[start..end].trim();
        if !sentence.is_empty() {
            sentences.push(sentence);
        }
        start = m.end();
    }
    let rest = paragraph[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}

/// Byte ranges of overlapping character windows covering `sentence`.
///
/// Window width is `target_tokens` converted to characters with the
/// sentence's own chars/token ratio, so cuts are approximate and may land
/// inside a word.
fn split_windows(sentence: &str, config: &ChunkConfig) -> Vec<(usize, usize)> {
    let char_starts: Vec<usize> = sentence.char_indices().map(|(i, _)| i).collect();
    let n = char_starts.len();
    if n == 0 {
        return Vec::new();
    }
    let byte_at = |ci: usize| if ci >= n { sentence.len() } else { char_starts[ci] };

    let tokens = count_tokens(sentence).max(1);
    let chars_per_token = n as f64 / tokens as f64;
    let window = ((config.target_tokens as f64 * chars_per_token) as usize).max(1);
    let back = ((config.overlap_tokens as f64 * chars_per_token) as usize).min(window - 1);

    let mut ranges = Vec::new();
    let mut start = 0;
    loop {
        let mut end = (start + window).min(n);
        while end - start > 1 && count_tokens(&sentence[byte_at(start)..byte_at(end)]) > config.max_tokens {
            end = start + (end - start) * 3 / 4;
        }
        ranges.push((byte_at(start), byte_at(end)));
        if end >= n {
            break;
        }
        let next = end.saturating_sub(back);
        start = if next > start { next } else { end };
    }
    ranges
}

/// The trailing words of `text` worth roughly `overlap_tokens`.
fn overlap_tail(text: &str, overlap_tokens: usize) -> &str {
    if overlap_tokens == 0 {
        return "";
    }

    let mut tokens = 0;
    let mut word_end: Option<usize> = None;
    for (i, c) in text.char_indices().rev() {
        if c.is_whitespace() {
            if let Some(end) = word_end.take() {
                let word_start = i + c.len_utf8();
                tokens += count_tokens(&text[word_start..end]);
                if tokens >= overlap_tokens {
                    return &text[word_start..];
                }
            }
        } else if word_end.is_none() {
            word_end = Some(i + c.len_utf8());
        }
    }

    // Either the whole text fits the budget or it is one long unbroken word.
    if count_tokens(text) <= overlap_tokens * 2 {
        text.trim_start()
    } else {
        ""
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> ChunkConfig {
        ChunkConfig {
            target_tokens: 50,
            max_tokens: 70,
            min_tokens: 20,
            overlap_tokens: 8,
        }
    }

    /// Grow a paragraph of distinct words until it reaches `tokens`.
    fn paragraph_of(tokens: usize, seed: &str) -> String {
        let mut text = String::new();
        let mut i = 0;
        while count_tokens(&text) < tokens {
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(&format!("{}{}", seed, i));
            i += 1;
        }
        text
    }

    fn non_whitespace(s: &str) -> String {
        s.chars().filter(|c| !c.is_whitespace()).collect()
    }

    fn assert_reconstructs(text: &str, chunks: &[TextChunk]) {
        let rebuilt: String = chunks.iter().map(|c| c.fresh_text()).collect();
        assert_eq!(non_whitespace(&rebuilt), non_whitespace(text));
    }

    fn assert_contiguous(chunks: &[TextChunk]) {
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i, "Index mismatch at position {}", i);
        }
    }

    #[test]
    fn test_empty_and_whitespace_yield_nothing() {
        assert!(chunk_text("", "a.md", &ChunkConfig::default()).is_empty());
        assert!(chunk_text("  \n\n \t\n", "a.md", &ChunkConfig::default()).is_empty());
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("Hello, world!", "a.md", &ChunkConfig::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].overlap_prefix, 0);
        assert_eq!(chunks[0].source.source_path, "a.md");
        assert_eq!(chunks[0].source.start_token, 0);
        assert_eq!(chunks[0].source.end_token, chunks[0].token_count);
    }

    #[test]
    fn test_multiple_paragraphs_under_limit() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let chunks = chunk_text(text, "a.md", &ChunkConfig::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
    }

    #[test]
    fn test_many_paragraphs_respect_budget() {
        let config = small_config();
        let text = (0..40)
            .map(|i| paragraph_of(15, &format!("p{}w", i)))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_text(&text, "a.md", &config);

        assert!(chunks.len() > 3);
        assert_contiguous(&chunks);
        for c in &chunks {
            assert!(c.token_count <= config.max_tokens, "chunk too large: {}", c.token_count);
        }
        assert_reconstructs(&text, &chunks);
    }

    #[test]
    fn test_closed_chunks_seed_overlap() {
        let config = small_config();
        let text = (0..20)
            .map(|i| paragraph_of(15, &format!("p{}w", i)))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_text(&text, "a.md", &config);
        assert!(chunks.len() > 1);

        for pair in chunks.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if next.overlap_prefix > 0 {
                let seed = &next.text[..next.overlap_prefix];
                assert!(prev.text.ends_with(seed), "seed {:?} not a suffix", seed);
            }
        }
        assert!(chunks[1..].iter().any(|c| c.overlap_prefix > 0));
    }

    #[test]
    fn test_oversized_paragraph_splits_on_sentences() {
        let config = small_config();
        let text = (0..30)
            .map(|i| format!("Sentence number {} talks about topic {}.", i, i * 7))
            .collect::<Vec<_>>()
            .join(" ");
        assert!(count_tokens(&text) > config.max_tokens);

        let chunks = chunk_text(&text, "a.md", &config);
        assert!(chunks.len() > 1);
        assert_contiguous(&chunks);
        for c in &chunks {
            assert!(c.token_count <= config.max_tokens);
        }
        // Sentence boundaries are respected: every chunk's fresh part ends a sentence.
        for c in &chunks {
            assert!(c.text.trim_end().ends_with('.'), "unexpected cut: {:?}", c.text);
        }
        assert_reconstructs(&text, &chunks);
    }

    #[test]
    fn test_unsplittable_sentence_uses_windows() {
        let config = small_config();
        let text = "abcdefghij".repeat(200);
        let chunks = chunk_text(&text, "min.js", &config);

        assert!(chunks.len() > 1);
        assert_contiguous(&chunks);
        for c in &chunks {
            assert!(c.token_count <= config.max_tokens);
        }
        assert!(chunks[1].overlap_prefix > 0);
        assert_reconstructs(&text, &chunks);
    }

    #[test]
    fn test_windows_are_utf8_safe() {
        let config = small_config();
        let text = "┌──────────┐日本語テキスト".repeat(60);
        let chunks = chunk_text(&text, "box.txt", &config);
        assert!(!chunks.is_empty());
        assert_reconstructs(&text, &chunks);
    }

    #[test]
    fn test_short_tail_merges_into_previous() {
        let config = small_config();
        let head = paragraph_of(config.target_tokens, "head");
        let tail = "Short closing note.";
        let text = format!("{}\n\n{}", head, tail);
        assert!(count_tokens(&text) <= config.max_tokens);

        let chunks = chunk_text(&text, "a.md", &config);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.ends_with(tail));
    }

    #[test]
    fn test_short_tail_kept_when_merge_would_overflow() {
        let config = small_config();
        let head = paragraph_of(67, "head");
        let tail = "Closing note here.";
        let merged = format!("{}\n\n{}", head, tail);
        assert!(count_tokens(&merged) > config.max_tokens);

        let chunks = chunk_text(&merged, "a.md", &config);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].token_count < config.min_tokens);
        assert_reconstructs(&merged, &chunks);
    }

    #[test]
    fn test_token_offsets_are_monotonic() {
        let config = small_config();
        let text = (0..12)
            .map(|i| paragraph_of(20, &format!("s{}x", i)))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_text(&text, "a.md", &config);
        for pair in chunks.windows(2) {
            assert!(pair[1].source.end_token > pair[0].source.end_token);
            assert!(pair[1].source.start_token <= pair[0].source.end_token);
        }
    }

    #[test]
    fn test_deterministic() {
        let config = small_config();
        let text = (0..10)
            .map(|i| paragraph_of(25, &format!("d{}", i)))
            .collect::<Vec<_>>()
            .join("\n\n");
        let c1 = chunk_text(&text, "a.md", &config);
        let c2 = chunk_text(&text, "a.md", &config);
        assert_eq!(c1, c2);
    }

    #[test]
    fn test_indentation_after_blank_line_is_kept() {
        let text = "class A:\n    def f(self):\n        x = 1\n\n        return x\n";
        let chunks = chunk_text(text, "a.py", &ChunkConfig::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text.trim_end());
        assert!(chunks[0].text.contains("\n\n        return x"));
    }

    #[test]
    fn test_trim_blank_lines() {
        assert_eq!(trim_blank_lines("\n  \n    indented\n  \n"), "    indented");
        assert_eq!(trim_blank_lines(" \t \n"), "");
        assert_eq!(trim_blank_lines("plain"), "plain");
    }

    #[test]
    fn test_split_sentences_keeps_punctuation() {
        let sentences = split_sentences("One. Two! Three? Four");
        assert_eq!(sentences, vec!["One.", "Two!", "Three?", "Four"]);
    }

    #[test]
    fn test_overlap_tail_takes_trailing_words() {
        let tail = overlap_tail("alpha beta gamma delta", 2);
        assert!("alpha beta gamma delta".ends_with(tail));
        assert!(tail.starts_with(|c: char| !c.is_whitespace()));
        assert!(tail.split_whitespace().count() >= 2);
        assert_eq!(overlap_tail("alpha beta", 0), "");
    }
}
