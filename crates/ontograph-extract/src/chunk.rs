//! Sentence-preserving text chunking.
//!
//! Pure and deterministic: the same normalized input always produces the
//! same chunk sequence. Sentence boundaries come from Unicode segmentation
//! (UAX #29); chunks accumulate whole sentences greedily up to the
//! character limit and the window advances by `window - overlap`
//! sentences, never by zero. Offsets are byte positions into the
//! normalized string, and each chunk's text equals
//! `normalized[start_offset..end_offset]`.

use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingOptions {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_sentences")]
    pub overlap_sentences: usize,
    #[serde(default = "default_preserve_sentences")]
    pub preserve_sentences: bool,
}

fn default_max_chars() -> usize {
    500
}

fn default_overlap_sentences() -> usize {
    2
}

fn default_preserve_sentences() -> bool {
    true
}

impl Default for ChunkingOptions {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_sentences: default_overlap_sentences(),
            preserve_sentences: default_preserve_sentences(),
        }
    }
}

/// A contiguous span of the normalized document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    /// Document-order position, never reordered downstream.
    pub index: usize,
    pub text: String,
    /// Byte offset into the normalized input, inclusive.
    pub start_offset: usize,
    /// Byte offset into the normalized input, exclusive.
    pub end_offset: usize,
}

/// Normalizes line endings to `\n`. Run before [`chunk_text`]; offsets
/// refer to this string.
pub fn normalize_text(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

/// Splits `text` into sentence-aligned chunks.
pub fn chunk_text(text: &str, opts: &ChunkingOptions) -> Vec<TextChunk> {
    let sentences: Vec<(usize, &str)> = text
        .split_sentence_bound_indices()
        .filter(|(_, s)| !s.trim().is_empty())
        .collect();
    if sentences.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut cursor = 0usize;

    while cursor < sentences.len() {
        let mut window = 0usize;
        let mut char_count = 0usize;

        while cursor + window < sentences.len() {
            let (_, sentence) = sentences[cursor + window];
            let sentence_chars = sentence.chars().count();
            if window > 0 && char_count + sentence_chars > opts.max_chars {
                break;
            }
            char_count += sentence_chars;
            window += 1;
            if char_count >= opts.max_chars {
                break;
            }
        }
        // window >= 1: a first sentence past the limit is still emitted whole
        // when sentences are preserved.

        let first = sentences[cursor];
        let last = sentences[cursor + window - 1];
        let start = first.0;
        let raw = &text[start..last.0 + last.1.len()];

        if window == 1 && !opts.preserve_sentences && raw.chars().count() > opts.max_chars {
            emit_split_sentence(&mut chunks, raw, start, opts.max_chars);
        } else {
            push_chunk(&mut chunks, raw, start);
        }

        // The chunk holding the final sentence ends the walk; otherwise the
        // cursor advances by window - overlap, floored at one.
        if cursor + window >= sentences.len() {
            break;
        }
        cursor += window.saturating_sub(opts.overlap_sentences).max(1);
    }

    chunks
}

fn push_chunk(chunks: &mut Vec<TextChunk>, raw: &str, start: usize) {
    let trimmed = raw.trim_end();
    if trimmed.is_empty() {
        return;
    }
    let index = chunks.len();
    chunks.push(TextChunk {
        index,
        text: trimmed.to_string(),
        start_offset: start,
        end_offset: start + trimmed.len(),
    });
}

/// Hard-splits one oversized sentence at character boundaries.
fn emit_split_sentence(chunks: &mut Vec<TextChunk>, raw: &str, start: usize, max_chars: usize) {
    let mut piece_start = 0usize;
    let mut count = 0usize;
    for (byte, _) in raw.char_indices() {
        if count == max_chars {
            push_chunk(chunks, &raw[piece_start..byte], start + piece_start);
            piece_start = byte;
            count = 0;
        }
        count += 1;
    }
    if piece_start < raw.len() {
        push_chunk(chunks, &raw[piece_start..], start + piece_start);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(max_chars: usize, overlap: usize) -> ChunkingOptions {
        ChunkingOptions {
            max_chars,
            overlap_sentences: overlap,
            preserve_sentences: true,
        }
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(chunk_text("", &ChunkingOptions::default()).is_empty());
        assert!(chunk_text("   \n  ", &ChunkingOptions::default()).is_empty());
    }

    #[test]
    fn single_sentence_is_one_chunk() {
        let chunks = chunk_text("Ronaldo plays for Al-Nassr.", &ChunkingOptions::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].text, "Ronaldo plays for Al-Nassr.");
        assert_eq!(chunks[0].start_offset, 0);
    }

    #[test]
    fn oversized_sentence_is_kept_whole_when_preserving() {
        let long = format!("{} end.", "word ".repeat(200));
        let chunks = chunk_text(&long, &opts(50, 0));
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn oversized_sentence_is_split_when_not_preserving() {
        let long = "x".repeat(120);
        let options = ChunkingOptions {
            max_chars: 50,
            overlap_sentences: 0,
            preserve_sentences: false,
        };
        let chunks = chunk_text(&long, &options);
        assert!(chunks.len() >= 3);
        let rebuilt: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(rebuilt, long);
    }

    #[test]
    fn offsets_slice_back_into_the_normalized_text() {
        let text = normalize_text("One sentence here. Another follows. A third closes.");
        let chunks = chunk_text(&text, &opts(30, 0));
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert_eq!(&text[chunk.start_offset..chunk.end_offset], chunk.text);
        }
    }

    #[test]
    fn indices_are_strictly_increasing() {
        let text = "A. B. C. D. E. F.";
        let chunks = chunk_text(text, &opts(4, 1));
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
        }
    }

    #[test]
    fn overlap_repeats_trailing_sentences() {
        let text = "First sentence is here. Second sentence is here. Third sentence is here. Fourth sentence is here.";
        let chunks = chunk_text(text, &opts(55, 1));
        assert!(chunks.len() >= 2);
        // Each successor chunk starts before its predecessor's end.
        for pair in chunks.windows(2) {
            assert!(pair[1].start_offset < pair[0].end_offset);
            assert!(pair[1].start_offset > pair[0].start_offset, "cursor always advances");
        }
    }

    #[test]
    fn line_ending_normalization() {
        assert_eq!(normalize_text("a\r\nb\rc\nd"), "a\nb\nc\nd");
    }

    #[test]
    fn non_overlap_region_reconstructs_input() {
        let text = "Alpha beta gamma. Delta epsilon zeta. Eta theta iota.";
        let chunks = chunk_text(text, &opts(25, 0));
        // With zero overlap the chunk spans tile the sentence region.
        for pair in chunks.windows(2) {
            assert!(pair[1].start_offset >= pair[0].end_offset);
        }
        let rebuilt: String = chunks
            .iter()
            .map(|c| &text[c.start_offset..c.end_offset])
            .collect::<Vec<_>>()
            .join(" ");
        assert_eq!(rebuilt.split_whitespace().count(), text.split_whitespace().count());
    }
}
