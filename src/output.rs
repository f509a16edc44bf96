//! Transcript serialization.
//!
//! JSON for machine consumers, SRT for human review in any subtitle
//! editor or video player.

use std::fmt::Write as _;

use serde_json::json;

use crate::error::ScribeResult;
use crate::model::MergedSegment;

/// Render segments as pretty-printed JSON:
///
/// ```json
/// {
///   "language": "en",
///   "segments": [{"start": 0.0, "end": 5.2, "text": "Hello world"}]
/// }
/// ```
pub fn write_json(segments: &[MergedSegment], language: &str) -> ScribeResult<String> {
    let value = json!({
        "language": language,
        "segments": segments,
    });
    Ok(serde_json::to_string_pretty(&value)?)
}

/// Render segments in SubRip format: 1-based sequence numbers,
/// `HH:MM:SS,mmm --> HH:MM:SS,mmm` timecodes, one block per segment.
#[must_use]
pub fn write_srt(segments: &[MergedSegment]) -> String {
    let mut srt = String::new();
    for (i, segment) in segments.iter().enumerate() {
        let _ = write!(
            srt,
            "{}\n{} --> {}\n{}\n\n",
            i + 1,
            format_srt_time(segment.start),
            format_srt_time(segment.end),
            segment.text
        );
    }
    srt
}

fn format_srt_time(seconds: f64) -> String {
    let total_millis = (seconds.max(0.0) * 1000.0).round() as u64;
    let hours = total_millis / 3_600_000;
    let minutes = (total_millis % 3_600_000) / 60_000;
    let secs = (total_millis % 60_000) / 1000;
    let millis = total_millis % 1000;
    format!("{hours:02}:{minutes:02}:{secs:02},{millis:03}")
}
