// Chunker
// Splits a transcript into overlapping character windows with stable indices.
// Offsets are character (Unicode scalar) positions into the transcript.

use crate::models::Chunk;
use serde::{Deserialize, Serialize};

use super::ModerationError;

/// Separators preferred by boundary-aware splitting, strongest first.
const BOUNDARY_SEPARATORS: &[&str] = &["\n\n", "\n", ". ", "? ", "! ", " "];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    /// Fixed stride of `chunk_size - overlap`.
    #[default]
    Window,
    /// Pull each chunk end back to the latest paragraph/line/sentence/word break.
    Boundary,
}

/// Validate chunking parameters before any work is dispatched.
pub fn validate_chunking(chunk_size: usize, overlap: usize) -> Result<(), ModerationError> {
    if chunk_size == 0 {
        return Err(ModerationError::Configuration(
            "chunk_size must be greater than 0".to_string(),
        ));
    }
    if overlap >= chunk_size {
        return Err(ModerationError::Configuration(format!(
            "overlap ({}) must be smaller than chunk_size ({})",
            overlap, chunk_size
        )));
    }
    Ok(())
}

/// Split with a fixed sliding window.
///
/// The cursor advances by `chunk_size - overlap`; each chunk covers
/// `[cursor, cursor + chunk_size)` clipped to the transcript length.
///
/// Clipping means the last chunk may lie entirely inside the one before it
/// (1100 chars at 600/100 ends with `[500,1100)` then `[1000,1100)`), so a
/// finding near the end of the transcript can be reported for both chunks.
/// `ChunkStrategy::Boundary` never emits such a contained chunk.
pub fn split(transcript: &str, chunk_size: usize, overlap: usize) -> Result<Vec<Chunk>, ModerationError> {
    split_with_strategy(transcript, chunk_size, overlap, ChunkStrategy::Window)
}

pub fn split_with_strategy(
    transcript: &str,
    chunk_size: usize,
    overlap: usize,
    strategy: ChunkStrategy,
) -> Result<Vec<Chunk>, ModerationError> {
    validate_chunking(chunk_size, overlap)?;

    let text = CharIndexed::new(transcript);
    let total = text.char_len();
    let stride = chunk_size - overlap;
    let mut chunks = Vec::new();
    let mut cursor = 0usize;

    while cursor < total {
        let window_end = (cursor + chunk_size).min(total);
        let end = match strategy {
            ChunkStrategy::Window => window_end,
            ChunkStrategy::Boundary if window_end < total => {
                text.last_break(cursor + overlap + 1, window_end).unwrap_or(window_end)
            }
            ChunkStrategy::Boundary => window_end,
        };

        if end > cursor {
            chunks.push(Chunk {
                index: chunks.len(),
                text: text.slice(cursor, end).to_string(),
                start_offset: cursor,
                end_offset: end,
            });
        }

        cursor = match strategy {
            ChunkStrategy::Window => cursor + stride,
            // `end` is past `cursor + overlap`, so the cursor always moves forward.
            ChunkStrategy::Boundary if end < total => end - overlap,
            ChunkStrategy::Boundary => total,
        };
    }

    Ok(chunks)
}

/// Character-position view over a `&str`.
struct CharIndexed<'a> {
    text: &'a str,
    /// Byte offset of every char plus the end-of-text offset.
    byte_offsets: Vec<usize>,
}

impl<'a> CharIndexed<'a> {
    fn new(text: &'a str) -> Self {
        let mut byte_offsets: Vec<usize> = text.char_indices().map(|(b, _)| b).collect();
        byte_offsets.push(text.len());
        Self { text, byte_offsets }
    }

    fn char_len(&self) -> usize {
        self.byte_offsets.len() - 1
    }

    fn slice(&self, start: usize, end: usize) -> &'a str {
        &self.text[self.byte_offsets[start]..self.byte_offsets[end]]
    }

    /// Latest char position in `[min_end, max_end]` that directly follows a
    /// preferred separator.
    fn last_break(&self, min_end: usize, max_end: usize) -> Option<usize> {
        if min_end > max_end {
            return None;
        }
        let window = self.slice(min_end.saturating_sub(2), max_end);
        let window_start_byte = self.byte_offsets[min_end.saturating_sub(2)];

        for sep in BOUNDARY_SEPARATORS {
            let found = window.rmatch_indices(sep).find_map(|(b, s)| {
                let after = window_start_byte + b + s.len();
                let pos = self.byte_offsets.binary_search(&after).ok()?;
                (pos >= min_end && pos <= max_end).then_some(pos)
            });
            if found.is_some() {
                return found;
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_covers(transcript: &str, chunks: &[Chunk]) {
        let total = transcript.chars().count();
        let mut covered = 0usize;
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
            assert_eq!(c.end_offset - c.start_offset, c.text.chars().count());
            assert!(c.start_offset <= covered, "gap before chunk {}", i);
            let expected: String = transcript
                .chars()
                .skip(c.start_offset)
                .take(c.len())
                .collect();
            assert_eq!(c.text, expected);
            covered = covered.max(c.end_offset);
        }
        assert_eq!(covered, total);
    }

    #[test]
    fn test_scenario_1200_chars() {
        let transcript = "a".repeat(1200);
        let chunks = split(&transcript, 600, 100).unwrap();
        let spans: Vec<(usize, usize)> = chunks.iter().map(|c| (c.start_offset, c.end_offset)).collect();
        assert_eq!(spans, vec![(0, 600), (500, 1100), (1000, 1200)]);
    }

    #[test]
    fn test_window_tail_may_repeat_inside_previous_chunk() {
        let transcript = "a".repeat(1100);
        let chunks = split(&transcript, 600, 100).unwrap();
        let spans: Vec<(usize, usize)> = chunks.iter().map(|c| (c.start_offset, c.end_offset)).collect();
        assert_eq!(spans, vec![(0, 600), (500, 1100), (1000, 1100)]);

        let boundary = split_with_strategy(&transcript, 600, 100, ChunkStrategy::Boundary).unwrap();
        let spans: Vec<(usize, usize)> = boundary.iter().map(|c| (c.start_offset, c.end_offset)).collect();
        assert_eq!(spans, vec![(0, 600), (500, 1100)]);
    }

    #[test]
    fn test_empty_transcript_yields_no_chunks() {
        assert!(split("", 10, 2).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_non_positive_stride() {
        assert!(matches!(split("abc", 5, 5), Err(ModerationError::Configuration(_))));
        assert!(matches!(split("abc", 5, 9), Err(ModerationError::Configuration(_))));
        assert!(matches!(split("abc", 0, 0), Err(ModerationError::Configuration(_))));
    }

    #[test]
    fn test_window_coverage_for_many_sizes() {
        let transcript = "The quick brown fox.\nJumps over the lazy dog!\n\nAnd again ".repeat(7);
        for size in 1..40 {
            for overlap in 0..size {
                let chunks = split(&transcript, size, overlap).unwrap();
                assert_covers(&transcript, &chunks);
            }
        }
    }

    #[test]
    fn test_offsets_are_characters_not_bytes() {
        let transcript = "héllo wörld ünïcode";
        let chunks = split(transcript, 5, 1).unwrap();
        assert_covers(transcript, &chunks);
        assert_eq!(chunks[0].text, "héllo");
    }

    #[test]
    fn test_boundary_strategy_prefers_line_breaks() {
        let transcript = "first line here\nsecond line here\nthird line";
        let chunks = split_with_strategy(transcript, 20, 0, ChunkStrategy::Boundary).unwrap();
        assert_eq!(chunks[0].text, "first line here\n");
        assert_covers(transcript, &chunks);
    }

    #[test]
    fn test_boundary_coverage_for_many_sizes() {
        let transcript = "Alpha beta. Gamma delta!\n\nEpsilon zeta eta\ntheta iota. ".repeat(5);
        for size in 2..30 {
            for overlap in 0..size {
                let chunks =
                    split_with_strategy(&transcript, size, overlap, ChunkStrategy::Boundary).unwrap();
                assert_covers(&transcript, &chunks);
                for pair in chunks.windows(2) {
                    assert!(pair[1].start_offset > pair[0].start_offset);
                }
            }
        }
    }
}
