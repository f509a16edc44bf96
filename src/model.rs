//! Core data types shared across the planning, execution, and merge stages.
//!
//! All durations are seconds as `f64`; byte offsets are `u64`. Timestamps
//! inside a [`ChunkTranscript`] are chunk-relative; [`MergedSegment`] carries
//! absolute positions in the original recording.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A detected stretch of silence in an audio file.
///
/// Silence is where we prefer to cut: a boundary placed inside a pause never
/// splits a word, and it gives the merger clean seams.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SilenceInterval {
    pub start: f64,
    pub end: f64,
}

impl SilenceInterval {
    #[must_use]
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Midpoint of the interval. Cutting here maximises the buffer of
    /// silence on both sides of the boundary.
    #[must_use]
    pub fn midpoint(&self) -> f64 {
        (self.start + self.end) / 2.0
    }

    /// Shift both endpoints by `offset` seconds (window-relative to
    /// absolute remapping).
    #[must_use]
    pub fn offset_by(&self, offset: f64) -> Self {
        Self {
            start: self.start + offset,
            end: self.end + offset,
        }
    }
}

/// A boundary chosen by the planner to end one chunk and start the next.
///
/// `silence` is `None` for a forced cut at the window end (no qualifying
/// silence was found in the lookback window).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub position: f64,
    pub silence: Option<SilenceInterval>,
}

impl Breakpoint {
    #[must_use]
    pub fn at_silence(silence: SilenceInterval) -> Self {
        Self {
            position: silence.midpoint(),
            silence: Some(silence),
        }
    }

    #[must_use]
    pub fn forced(position: f64) -> Self {
        Self {
            position,
            silence: None,
        }
    }

    #[must_use]
    pub fn has_silence(&self) -> bool {
        self.silence.is_some()
    }
}

/// Everything needed to download and transcribe one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChunkPlan {
    pub chunk_index: u32,
    pub start_seconds: f64,
    pub end_seconds: f64,
    /// Start of the region this chunk shares with its predecessor, if any.
    pub overlap_start: Option<f64>,
    pub overlap_end: Option<f64>,
}

impl ChunkPlan {
    /// A plan without overlap (silence-aware mode, or the first chunk).
    #[must_use]
    pub fn new(chunk_index: u32, start_seconds: f64, end_seconds: f64) -> Self {
        Self {
            chunk_index,
            start_seconds,
            end_seconds,
            overlap_start: None,
            overlap_end: None,
        }
    }

    #[must_use]
    pub fn duration(&self) -> f64 {
        self.end_seconds - self.start_seconds
    }

    #[must_use]
    pub fn has_overlap(&self) -> bool {
        self.overlap_start.is_some() && self.overlap_end.is_some()
    }

    #[must_use]
    pub fn overlap_duration(&self) -> f64 {
        match (self.overlap_start, self.overlap_end) {
            (Some(start), Some(end)) => end - start,
            _ => 0.0,
        }
    }
}

/// One segment as returned by the transcription service. Times are relative
/// to the start of the chunk that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl TranscriptSegment {
    #[must_use]
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }
}

/// Response of a single transcription call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscribeResponse {
    pub segments: Vec<TranscriptSegment>,
    pub language: String,
}

/// Transcript of a single chunk plus the metadata needed to place it on the
/// absolute timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkTranscript {
    pub chunk_index: u32,
    /// Absolute position of the chunk's first sample in the recording.
    pub start_offset: f64,
    pub segments: Vec<TranscriptSegment>,
    pub language: String,
}

impl ChunkTranscript {
    /// Relative end time of the last segment, 0.0 for an empty transcript.
    #[must_use]
    pub fn last_segment_end(&self) -> f64 {
        self.segments.last().map(|s| s.end).unwrap_or(0.0)
    }
}

/// A transcript segment with absolute timing in the original recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl MergedSegment {
    #[must_use]
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }

    /// Lift a chunk-relative segment onto the absolute timeline.
    #[must_use]
    pub fn from_relative(segment: &TranscriptSegment, chunk_offset: f64) -> Self {
        Self {
            start: chunk_offset + segment.start,
            end: chunk_offset + segment.end,
            text: segment.text.clone(),
        }
    }
}

/// How the recording is split into chunks, and consequently how the chunk
/// transcripts are reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkingMode {
    /// Fixed intervals that share `overlap_seconds` with their neighbour;
    /// the merger aligns words to drop the duplicated phrasing.
    Overlap,
    /// Variable-length chunks meeting at silence midpoints, merged by plain
    /// concatenation.
    SilenceAware,
}

impl ChunkingMode {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Overlap => "overlap",
            Self::SilenceAware => "silence-aware",
        }
    }
}

impl std::fmt::Display for ChunkingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Object-store metadata obtained without downloading the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub content_length: u64,
    pub content_type: Option<String>,
}

/// What the caller asks the pipeline to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptionRequest {
    pub bucket: String,
    pub key: String,
    pub mode: ChunkingMode,
}

impl TranscriptionRequest {
    #[must_use]
    pub fn new(bucket: impl Into<String>, key: impl Into<String>, mode: ChunkingMode) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            mode,
        }
    }
}

/// Lifecycle of a transcription run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunState {
    Pending,
    Running,
    Planning,
    Processing,
    Merging,
    Completed,
    Failed,
}

impl RunState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Planning => "planning",
            Self::Processing => "processing",
            Self::Merging => "merging",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-chunk accounting included in the run diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkInfo {
    pub chunk_index: u32,
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub segment_count: usize,
}

/// Summary numbers describing how a run went.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDiagnostics {
    pub chunk_count: usize,
    pub estimated_duration_seconds: f64,
    pub total_segments: usize,
    pub cached_chunks: usize,
    pub chunks: Vec<ChunkInfo>,
}

/// Final product of a run: the merged timeline plus diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionOutcome {
    pub run_id: String,
    pub started_at_rfc3339: String,
    pub finished_at_rfc3339: String,
    pub mode: ChunkingMode,
    pub language: String,
    pub segments: Vec<MergedSegment>,
    pub diagnostics: RunDiagnostics,
}

/// Result of a chunk preview (planning without transcription).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanPreview {
    pub estimated_duration_seconds: f64,
    pub mode: ChunkingMode,
    pub plans: Vec<ChunkPlan>,
}

/// A time range extracted to a local file by the `extract` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedClip {
    pub path: PathBuf,
    pub start_seconds: f64,
    pub end_seconds: f64,
}
