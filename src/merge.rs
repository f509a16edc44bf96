//! Reconciliation of adjacent chunk transcripts into one absolute timeline.
//!
//! Overlap mode: the end of the previous chunk re-appears at the start of
//! the next one. We find the longest contiguous run of matching words
//! between the previous chunk's overlap tail and the next chunk's body,
//! derive a timestamp cutoff from where that run ends in the next chunk,
//! and emit only the next chunk's segments past the cutoff.
//!
//! Silence-aware mode: chunks meet at silence midpoints, so merging is a
//! plain concatenation with offsets applied; overlapping neighbours are an
//! anomaly worth logging but are still appended.

use crate::model::{ChunkTranscript, ChunkingMode, MergedSegment};

/// Normalise a word for comparison: lowercase, strip common punctuation.
/// Handles transcription jitter like `Hello` vs `hello.` at chunk seams.
#[must_use]
pub fn normalize_word(word: &str) -> String {
    word.to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '.' | ',' | '!' | '?' | ';' | ':' | '\'' | '"'))
        .collect::<String>()
        .trim()
        .to_owned()
}

/// Whitespace-split a transcript body into non-empty tokens.
#[must_use]
pub fn extract_words(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_owned).collect()
}

/// The longest contiguous run of equal (normalised) words between two
/// token lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordMatch {
    /// Number of consecutive matching words.
    pub length: usize,
    /// Start of the run in the previous chunk's tail tokens.
    pub prev_start: usize,
    /// Start of the run in the current chunk's tokens.
    pub curr_start: usize,
}

impl WordMatch {
    /// Index just past the matched run within the current chunk's tokens.
    #[must_use]
    pub fn curr_end(&self) -> usize {
        self.curr_start + self.length
    }
}

/// Find the longest contiguous common word run between `prev_words` and
/// `curr_words`, requiring at least `min_match_words` words.
///
/// Ties are broken by the earlier start in the current chunk, then by the
/// earlier start in the previous tail.
#[must_use]
pub fn find_longest_match(
    prev_words: &[String],
    curr_words: &[String],
    min_match_words: usize,
) -> Option<WordMatch> {
    if prev_words.is_empty() || curr_words.is_empty() {
        return None;
    }

    let prev_normalized: Vec<String> = prev_words.iter().map(|w| normalize_word(w)).collect();
    let curr_normalized: Vec<String> = curr_words.iter().map(|w| normalize_word(w)).collect();

    let mut best: Option<WordMatch> = None;

    for curr_start in 0..curr_normalized.len() {
        for prev_start in 0..prev_normalized.len() {
            let mut length = 0;
            while prev_start + length < prev_normalized.len()
                && curr_start + length < curr_normalized.len()
                && prev_normalized[prev_start + length] == curr_normalized[curr_start + length]
            {
                length += 1;
            }

            // Strict `>` keeps the earliest curr_start, then the earliest
            // prev_start, for equal lengths.
            if length > best.map(|b| b.length).unwrap_or(0) {
                best = Some(WordMatch {
                    length,
                    prev_start,
                    curr_start,
                });
            }
        }
    }

    best.filter(|m| m.length >= min_match_words)
}

/// Merge chunk transcripts according to the chunking mode.
#[must_use]
pub fn merge(
    mode: ChunkingMode,
    chunks: &[ChunkTranscript],
    min_match_words: usize,
) -> Vec<MergedSegment> {
    match mode {
        ChunkingMode::Overlap => merge_overlapping(chunks, min_match_words),
        ChunkingMode::SilenceAware => merge_concatenated(chunks),
    }
}

/// Overlap-mode merge: word-aligned timestamp cutoff per chunk boundary.
#[must_use]
pub fn merge_overlapping(chunks: &[ChunkTranscript], min_match_words: usize) -> Vec<MergedSegment> {
    let Some(first) = chunks.first() else {
        return Vec::new();
    };

    let mut merged: Vec<MergedSegment> = first
        .segments
        .iter()
        .map(|s| MergedSegment::from_relative(s, first.start_offset))
        .collect();

    for pair in chunks.windows(2) {
        let (prev, curr) = (&pair[0], &pair[1]);
        merged.extend(merge_boundary(prev, curr, min_match_words));
    }

    merged
}

/// Segments of `curr` to append after reconciling its seam with `prev`.
fn merge_boundary(
    prev: &ChunkTranscript,
    curr: &ChunkTranscript,
    min_match_words: usize,
) -> Vec<MergedSegment> {
    // Segments of prev that fall inside the shared region.
    let overlap_start_relative = curr.start_offset - prev.start_offset;
    let prev_tail: Vec<&crate::model::TranscriptSegment> = prev
        .segments
        .iter()
        .filter(|s| s.start >= overlap_start_relative)
        .collect();

    if prev_tail.is_empty() {
        // Nothing of prev reached into the overlap; keep all of curr.
        return curr
            .segments
            .iter()
            .map(|s| MergedSegment::from_relative(s, curr.start_offset))
            .collect();
    }

    let prev_words: Vec<String> = prev_tail
        .iter()
        .flat_map(|s| extract_words(&s.text))
        .collect();
    let curr_words: Vec<String> = curr
        .segments
        .iter()
        .flat_map(|s| extract_words(&s.text))
        .collect();

    match find_longest_match(&prev_words, &curr_words, min_match_words) {
        Some(word_match) => {
            tracing::debug!(
                prev_chunk = prev.chunk_index,
                curr_chunk = curr.chunk_index,
                matched_words = word_match.length,
                "aligned chunk boundary on word match"
            );
            let cutoff = cutoff_after_word(curr, word_match.curr_end());
            let absolute_cutoff = curr.start_offset + cutoff;
            emit_from_cutoff(curr, absolute_cutoff)
        }
        None => {
            tracing::warn!(
                prev_chunk = prev.chunk_index,
                curr_chunk = curr.chunk_index,
                "no word match at chunk boundary, falling back to timestamp cut"
            );
            let absolute_cutoff = prev.start_offset + prev.last_segment_end();
            emit_from_cutoff(curr, absolute_cutoff)
        }
    }
}

/// Walk `curr`'s segments accumulating word counts; the first segment whose
/// running total reaches `word_end_index` supplies the relative cutoff time.
fn cutoff_after_word(curr: &ChunkTranscript, word_end_index: usize) -> f64 {
    let mut word_count = 0usize;
    for segment in &curr.segments {
        word_count += extract_words(&segment.text).len();
        if word_count >= word_end_index {
            return segment.end;
        }
    }
    curr.last_segment_end()
}

fn emit_from_cutoff(curr: &ChunkTranscript, absolute_cutoff: f64) -> Vec<MergedSegment> {
    curr.segments
        .iter()
        .map(|s| MergedSegment::from_relative(s, curr.start_offset))
        .filter(|s| s.start >= absolute_cutoff)
        .collect()
}

/// Silence-mode merge: offset and append in chunk-index order.
#[must_use]
pub fn merge_concatenated(chunks: &[ChunkTranscript]) -> Vec<MergedSegment> {
    let mut merged = Vec::new();

    for pair in chunks.windows(2) {
        let (prev, curr) = (&pair[0], &pair[1]);
        let prev_end = prev.start_offset + prev.last_segment_end();
        if curr.start_offset < prev_end {
            tracing::warn!(
                prev_chunk = prev.chunk_index,
                curr_chunk = curr.chunk_index,
                prev_end,
                curr_start = curr.start_offset,
                "unexpected overlap between silence-aware chunks"
            );
        }
    }

    for chunk in chunks {
        for segment in &chunk.segments {
            merged.push(MergedSegment::from_relative(segment, chunk.start_offset));
        }
    }

    merged
}

/// Post-merge sanity check: start times must never decrease.
pub fn check_monotonic(segments: &[MergedSegment]) -> Result<(), String> {
    for pair in segments.windows(2) {
        if pair[1].start < pair[0].start {
            return Err(format!(
                "merged segment starts decreased: {:.3}s after {:.3}s (\"{}\")",
                pair[1].start, pair[0].start, pair[1].text
            ));
        }
    }
    Ok(())
}
