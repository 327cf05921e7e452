//! Boundary-aware, overlap-preserving text chunker.
//!
//! Splits an analysis report into [`Chunk`]s no longer than
//! `max_chars` characters. Splitting prefers paragraph breaks, then line
//! breaks, then sentence ends, then any whitespace, and only cuts inside a
//! word when a single unit exceeds the budget.
//!
//! Each chunk after the first begins with the last `overlap_chars`
//! characters that precede it, so a retrieval hit carries context from
//! across the boundary. [`reassemble`] strips exactly that prefix, which
//! recovers the original text byte for byte.
//!
//! # Algorithm
//!
//! 1. If the text has at most `max_chars` characters, emit one chunk.
//! 2. Otherwise partition the text into contiguous segments. Segment 0 may
//!    use `max_chars`; later segments use `max_chars - overlap_chars`, so
//!    prefix + segment never exceeds `max_chars`.
//! 3. The number of segments is fixed up front at the smallest count that
//!    can hold the text, see [`min_chunk_count`].
//! 4. Each segment ends at the latest preferred boundary inside
//!    `[lo, start + budget]`. `lo` is half the budget past `start` (at
//!    least `overlap_chars` for segment 0 so that every later chunk has a
//!    full prefix to borrow), raised when needed so that the text left over
//!    still fits in the remaining segments. Without a boundary in range the
//!    segment is cut at `start + budget`.
//! 5. Chunk `i > 0` is `overlap_chars` characters of preceding text
//!    followed by segment `i`.
//!
//! # Example
//!
//! ```rust
//! use quality_store_core::chunk::{reassemble, split_text, ChunkingParams};
//!
//! let params = ChunkingParams { max_chars: 50, overlap_chars: 10 };
//! let text = "x".repeat(120);
//! let chunks = split_text(&text, &params);
//! assert_eq!(chunks.len(), 3);
//! assert_eq!(reassemble(&chunks, params.overlap_chars), text);
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::models::{Analysis, Chunk};

/// Namespace for deterministic chunk ids.
const CHUNK_NAMESPACE: Uuid = Uuid::from_u128(0x6b1f_3c2e_9a4d_4f57_8e21_5d0c_7a93_b4e1);

/// Chunk sizing, measured in characters (Unicode scalar values).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingParams {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self {
            max_chars: 8000,
            overlap_chars: 200,
        }
    }
}

impl ChunkingParams {
    pub fn validate(&self) -> Result<()> {
        if self.max_chars == 0 {
            return Err(StoreError::Configuration(
                "chunking.max_chars must be > 0".to_string(),
            ));
        }
        if self.overlap_chars >= self.max_chars {
            return Err(StoreError::Configuration(format!(
                "chunking.overlap_chars ({}) must be smaller than chunking.max_chars ({})",
                self.overlap_chars, self.max_chars
            )));
        }
        Ok(())
    }
}

/// Smallest number of chunks that can hold `total_chars` characters.
///
/// One chunk up to `max_chars`, then `max_chars - overlap_chars` fresh
/// characters per additional chunk. [`split_text`] always produces exactly
/// this many.
pub fn min_chunk_count(total_chars: usize, params: &ChunkingParams) -> usize {
    let max = params.max_chars.max(1);
    let step = max - params.overlap_chars.min(max - 1);
    if total_chars <= max {
        1
    } else {
        1 + (total_chars - max).div_ceil(step)
    }
}

/// Split `text` into ordered chunk texts.
///
/// Deterministic: the same text and params always produce the same
/// boundaries. Always returns at least one chunk (empty text yields `[""]`).
/// Params are assumed valid; see [`ChunkingParams::validate`].
pub fn split_text(text: &str, params: &ChunkingParams) -> Vec<String> {
    let max = params.max_chars.max(1);
    let overlap = params.overlap_chars.min(max - 1);

    // bounds[p] is the byte offset of char position p; bounds[total] == text.len().
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let total = bounds.len() - 1;

    if total <= max {
        return vec![text.to_string()];
    }

    let step = max - overlap;
    let count = min_chunk_count(total, params);
    let mut segments: Vec<(usize, usize)> = Vec::with_capacity(count);
    let mut start = 0;
    for i in 0..count {
        let first = i == 0;
        let budget = if first { max } else { step };
        let hard_end = (start + budget).min(total);
        let remaining = count - 1 - i;
        let end = if remaining == 0 || hard_end == total {
            total
        } else {
            let mut min_len = (budget / 2).max(1);
            if first {
                min_len = min_len.max(overlap);
            }
            // Leave no more than the later segments can carry.
            let fits = total.saturating_sub(remaining * step);
            let lo = (start + min_len).max(fits).min(hard_end);
            find_break(text, &bounds, lo, hard_end)
        };
        segments.push((start, end));
        start = end;
    }

    segments
        .iter()
        .enumerate()
        .map(|(i, &(s, e))| {
            let from = if i == 0 { s } else { s - overlap };
            text[bounds[from]..bounds[e]].to_string()
        })
        .collect()
}

/// Pick the segment end (a char position) inside `[lo, hi]`.
fn find_break(text: &str, bounds: &[usize], lo: usize, hi: usize) -> usize {
    for tier in 0..4u8 {
        if let Some(pos) = (lo..=hi)
            .rev()
            .find(|&p| is_break(&text[..bounds[p]], tier))
        {
            return pos;
        }
    }
    hi
}

/// Tier 0: paragraph, 1: line, 2: sentence, 3: any whitespace.
fn is_break(before: &str, tier: u8) -> bool {
    match tier {
        0 => before.ends_with("\n\n"),
        1 => before.ends_with('\n'),
        2 => [". ", "! ", "? "].iter().any(|end| before.ends_with(end)),
        _ => before
            .chars()
            .next_back()
            .is_some_and(char::is_whitespace),
    }
}

/// Rebuild the original text from ordered chunk texts.
///
/// Drops `overlap_chars` leading characters from every chunk after the
/// first, undoing the prefix added by [`split_text`].
pub fn reassemble<S: AsRef<str>>(chunks: &[S], overlap_chars: usize) -> String {
    let mut out = String::new();
    for (i, chunk) in chunks.iter().enumerate() {
        let chunk = chunk.as_ref();
        if i == 0 {
            out.push_str(chunk);
        } else {
            let tail = chunk
                .char_indices()
                .nth(overlap_chars)
                .map(|(b, _)| &chunk[b..])
                .unwrap_or("");
            out.push_str(tail);
        }
    }
    out
}

/// Deterministic id of the chunk at `sequence_index` of `app_id`.
pub fn chunk_id_for(app_id: &str, sequence_index: u32) -> String {
    let name = format!("{}#{}", app_id, sequence_index);
    Uuid::new_v5(&CHUNK_NAMESPACE, name.as_bytes()).to_string()
}

/// Split an analysis into [`Chunk`]s with stable ids and content hashes.
pub fn chunk_analysis(analysis: &Analysis, params: &ChunkingParams) -> Vec<Chunk> {
    split_text(&analysis.source_text, params)
        .into_iter()
        .enumerate()
        .map(|(i, text)| make_chunk(&analysis.app_id, i as u32, text))
        .collect()
}

fn make_chunk(app_id: &str, index: u32, text: String) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        chunk_id: chunk_id_for(app_id, index),
        app_id: app_id.to_string(),
        sequence_index: index,
        text,
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FocusArea;

    fn params(max_chars: usize, overlap_chars: usize) -> ChunkingParams {
        ChunkingParams {
            max_chars,
            overlap_chars,
        }
    }

    fn report(paragraphs: usize) -> String {
        (0..paragraphs)
            .map(|i| {
                format!(
                    "## Finding {}\n\nThe service logs request ids. Retries use backoff! Is the timeout {}s? Yes.",
                    i,
                    i * 5
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = split_text("Hello, world!", &params(700, 50));
        assert_eq!(chunks, vec!["Hello, world!".to_string()]);
    }

    #[test]
    fn test_empty_text_single_chunk() {
        let chunks = split_text("", &params(700, 50));
        assert_eq!(chunks, vec![String::new()]);
        assert_eq!(reassemble(&chunks, 50), "");
    }

    #[test]
    fn test_exactly_max_is_single_chunk() {
        let text = "y".repeat(64);
        assert_eq!(split_text(&text, &params(64, 8)).len(), 1);
    }

    #[test]
    fn test_120_chars_size_50_overlap_10() {
        let text = "x".repeat(120);
        let p = params(50, 10);
        let chunks = split_text(&text, &p);
        assert_eq!(chunks.len(), 3);
        let rebuilt = reassemble(&chunks, p.overlap_chars);
        assert_eq!(rebuilt.chars().count(), 120);
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_120_chars_of_prose_size_50_overlap_10() {
        let text = "Logs lack ids. Retries are used. Timeouts are set. \
                    Errors are logged. Metrics are sparse. Tests are flaky. Docs are old.";
        assert_eq!(text.chars().count(), 120);
        let p = params(50, 10);
        let chunks = split_text(text, &p);
        assert_eq!(chunks.len(), 3);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 50, "chunk too long: {:?}", chunk);
        }
        assert_eq!(reassemble(&chunks, p.overlap_chars), text);
    }

    #[test]
    fn test_min_chunk_count() {
        assert_eq!(min_chunk_count(0, &params(50, 10)), 1);
        assert_eq!(min_chunk_count(50, &params(50, 10)), 1);
        assert_eq!(min_chunk_count(51, &params(50, 10)), 2);
        assert_eq!(min_chunk_count(90, &params(50, 10)), 2);
        assert_eq!(min_chunk_count(91, &params(50, 10)), 3);
        assert_eq!(min_chunk_count(120, &params(50, 10)), 3);
        assert_eq!(min_chunk_count(5, &params(2, 1)), 4);
    }

    /// Deterministic pseudo-random texts mixing prose, line and paragraph
    /// breaks, multibyte characters and words longer than any budget.
    fn generated_texts() -> Vec<String> {
        let words = [
            "logs",
            "retry",
            "timeout.",
            "Errors!",
            "why?",
            "wörld ✓",
            "┌──┐",
            "a",
            "\n",
            "\n\n",
            "unmaintainablecodepathwithoutanyobviousbreakpointswhatsoever",
        ];
        let mut state: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = move |bound: usize| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state % bound as u64) as usize
        };
        let mut texts = vec![report(3), "z".repeat(301), "word ".repeat(64)];
        for _ in 0..200 {
            let n = next(90);
            let text = (0..n)
                .map(|_| words[next(words.len())])
                .collect::<Vec<_>>()
                .join(" ");
            texts.push(text);
        }
        texts
    }

    #[test]
    fn test_chunk_count_is_minimal_for_varied_text() {
        let grid = [
            (1, 0),
            (2, 1),
            (10, 0),
            (17, 4),
            (40, 39),
            (50, 10),
            (97, 13),
            (120, 30),
            (250, 60),
        ];
        for text in generated_texts() {
            let total = text.chars().count();
            for (max, overlap) in grid {
                let p = params(max, overlap);
                let chunks = split_text(&text, &p);
                assert_eq!(
                    chunks.len(),
                    min_chunk_count(total, &p),
                    "count for {} chars, max={} overlap={}",
                    total,
                    max,
                    overlap
                );
                for chunk in &chunks {
                    assert!(
                        chunk.chars().count() <= max,
                        "chunk over {} chars: {:?}",
                        max,
                        chunk
                    );
                }
                assert_eq!(reassemble(&chunks, overlap), text);
            }
        }
    }

    #[test]
    fn test_chunks_respect_max_chars() {
        let text = report(40);
        let p = params(120, 30);
        for chunk in split_text(&text, &p) {
            assert!(
                chunk.chars().count() <= p.max_chars,
                "chunk too long: {}",
                chunk.chars().count()
            );
        }
    }

    #[test]
    fn test_overlap_prefix_matches_previous_tail() {
        let text = report(10);
        let p = params(100, 20);
        let chunks = split_text(&text, &p);
        assert!(chunks.len() > 2);
        let rebuilt = reassemble(&chunks, p.overlap_chars);
        let mut consumed = 0;
        for (i, chunk) in chunks.iter().enumerate() {
            let len = chunk.chars().count();
            if i > 0 {
                let prefix: String = chunk.chars().take(p.overlap_chars).collect();
                let expected: String = rebuilt
                    .chars()
                    .skip(consumed - p.overlap_chars)
                    .take(p.overlap_chars)
                    .collect();
                assert_eq!(prefix, expected, "overlap mismatch at chunk {}", i);
                consumed += len - p.overlap_chars;
            } else {
                consumed += len;
            }
        }
    }

    #[test]
    fn test_reassemble_roundtrip_various_params() {
        let text = report(25);
        for (max, overlap) in [(40, 0), (40, 39), (97, 13), (250, 60), (1000, 200)] {
            let p = params(max, overlap);
            let chunks = split_text(&text, &p);
            assert_eq!(
                reassemble(&chunks, overlap),
                text,
                "roundtrip failed for max={} overlap={}",
                max,
                overlap
            );
        }
    }

    #[test]
    fn test_prefers_paragraph_boundaries() {
        let text = "First paragraph here.\n\nSecond paragraph here.\n\nThird paragraph here.";
        let chunks = split_text(text, &params(30, 0));
        assert_eq!(chunks[0], "First paragraph here.\n\n");
        assert!(chunks[1].starts_with("Second"));
    }

    #[test]
    fn test_hard_cut_for_oversized_word() {
        let text = "z".repeat(95);
        let chunks = split_text(&text, &params(40, 5));
        assert!(chunks.len() >= 3);
        assert_eq!(reassemble(&chunks, 5), text);
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let text = "┌──────────────────┐\n│ Hello wörld ✓    │\n└──────────────────┘".repeat(4);
        let p = params(17, 4);
        let chunks = split_text(&text, &p);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.chars().count() <= 17);
        }
        assert_eq!(reassemble(&chunks, 4), text);
    }

    #[test]
    fn test_deterministic_ids_and_boundaries() {
        let analysis = Analysis::new("app-7", "Billing", [FocusArea::Logging], report(8));
        let p = params(90, 15);
        let a = chunk_analysis(&analysis, &p);
        let b = chunk_analysis(&analysis, &p);
        assert_eq!(a, b);
        for (i, c) in a.iter().enumerate() {
            assert_eq!(c.sequence_index, i as u32);
            assert_eq!(c.chunk_id, chunk_id_for("app-7", i as u32));
        }
    }

    #[test]
    fn test_chunk_ids_differ_per_app_and_index() {
        assert_ne!(chunk_id_for("a", 0), chunk_id_for("a", 1));
        assert_ne!(chunk_id_for("a", 0), chunk_id_for("b", 0));
        assert_eq!(chunk_id_for("a", 3), chunk_id_for("a", 3));
    }

    #[test]
    fn test_params_validation() {
        assert!(params(50, 10).validate().is_ok());
        assert!(params(0, 0).validate().is_err());
        assert!(params(10, 10).validate().is_err());
    }
}
