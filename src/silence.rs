//! Silence detection and audio extraction via ffmpeg.
//!
//! The probe runs ffmpeg's `silencedetect` filter over a local file and
//! parses `silence_start:` / `silence_end:` pairs from the diagnostic
//! stream. ffmpeg writes these to stderr; stdout stays empty because the
//! output muxer is `null`.

use std::path::Path;
use std::time::Duration;

use crate::error::{ScribeError, ScribeResult};
use crate::model::SilenceInterval;
use crate::pipeline::CancelToken;
use crate::process::{run_command_cancellable, run_command_with_timeout};

/// Upper bound on parsed intervals per invocation. Pathological inputs
/// (e.g. digital silence with dithering) can emit one interval per frame.
const MAX_INTERVALS: usize = 10_000;

/// Anything that can report silence intervals for a local audio file.
/// The production implementation shells out to ffmpeg; tests script it.
pub trait SilenceAnalyzer: Send + Sync {
    fn analyze(
        &self,
        input: &Path,
        token: Option<&CancelToken>,
    ) -> ScribeResult<Vec<SilenceInterval>>;
}

/// Detects silence intervals in local audio files.
#[derive(Debug, Clone)]
pub struct SilenceProbe {
    /// dBFS threshold below which audio counts as silence, e.g. `-30dB`.
    noise_arg: String,
    /// Minimum silence length reported, seconds.
    min_duration: f64,
    timeout: Duration,
}

impl SilenceProbe {
    #[must_use]
    pub fn new(noise_db: f64, min_duration: f64) -> Self {
        Self {
            noise_arg: format!("{noise_db}dB"),
            min_duration,
            timeout: ffmpeg_timeout(),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Analyze a local file and return silence intervals sorted by start.
    ///
    /// Intervals shorter than the configured minimum are discarded. A
    /// trailing `silence_start` without a matching end is dropped silently.
    pub fn probe(
        &self,
        input: &Path,
        token: Option<&CancelToken>,
    ) -> ScribeResult<Vec<SilenceInterval>> {
        tracing::debug!(stage = "probe", input = %input.display(), "running silencedetect");

        let args = vec![
            "-hide_banner".to_owned(),
            "-nostats".to_owned(),
            "-i".to_owned(),
            input.display().to_string(),
            "-af".to_owned(),
            format!(
                "silencedetect=noise={}:d={}",
                self.noise_arg, self.min_duration
            ),
            "-f".to_owned(),
            "null".to_owned(),
            "-".to_owned(),
        ];

        let output = match token {
            Some(tok) => run_command_cancellable("ffmpeg", &args, None, tok, Some(self.timeout)),
            None => run_command_with_timeout("ffmpeg", &args, None, Some(self.timeout)),
        };

        let output = match output {
            Ok(out) => out,
            Err(err @ ScribeError::Cancelled(_)) | Err(err @ ScribeError::CommandMissing { .. }) => {
                return Err(err);
            }
            Err(err) => return Err(ScribeError::AnalysisFailed(err.to_string())),
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        let intervals = self.parse_silence_output(&stderr);
        tracing::debug!(
            stage = "probe",
            intervals = intervals.len(),
            "silencedetect complete"
        );
        Ok(intervals)
    }

    /// Pair `silence_start` / `silence_end` lines into intervals.
    fn parse_silence_output(&self, stderr: &str) -> Vec<SilenceInterval> {
        let mut intervals: Vec<SilenceInterval> = Vec::new();
        let mut current_start: Option<f64> = None;

        for line in stderr.lines() {
            if let Some(value) = parse_value_after(line, "silence_start:") {
                current_start = Some(value);
                continue;
            }

            if let Some(end) = parse_value_after(line, "silence_end:") {
                if let Some(start) = current_start.take() {
                    let interval = SilenceInterval::new(start, end);
                    if interval.duration() >= self.min_duration {
                        intervals.push(interval);
                    }
                    if intervals.len() >= MAX_INTERVALS {
                        tracing::warn!(
                            stage = "probe",
                            limit = MAX_INTERVALS,
                            "silence interval limit reached, stopping parse"
                        );
                        break;
                    }
                }
            }
        }

        // ffmpeg emits intervals in order, but sort to be safe.
        intervals.sort_by(|a, b| a.start.total_cmp(&b.start));
        intervals
    }
}

impl SilenceAnalyzer for SilenceProbe {
    fn analyze(
        &self,
        input: &Path,
        token: Option<&CancelToken>,
    ) -> ScribeResult<Vec<SilenceInterval>> {
        self.probe(input, token)
    }
}

/// Extract a value like `45.2` following `marker` on a diagnostic line.
fn parse_value_after(line: &str, marker: &str) -> Option<f64> {
    let idx = line.find(marker)?;
    let rest = line[idx + marker.len()..].trim_start();
    let end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-'))
        .unwrap_or(rest.len());
    rest[..end].parse::<f64>().ok()
}

/// Cut `[start, end]` out of a local audio file into a standalone MP3.
///
/// Stream copy is tried first (fast, lossless) and only works at frame
/// boundaries; on failure the range is re-encoded with libmp3lame.
pub fn extract_clip(
    input: &Path,
    start_seconds: f64,
    end_seconds: f64,
    output: &Path,
    token: Option<&CancelToken>,
) -> ScribeResult<()> {
    if end_seconds <= start_seconds {
        return Err(ScribeError::InvalidRequest(format!(
            "extract range end ({end_seconds}s) must be after start ({start_seconds}s)"
        )));
    }

    tracing::info!(
        stage = "extract",
        start = start_seconds,
        end = end_seconds,
        output = %output.display(),
        "cutting clip"
    );

    let copy_args = clip_args(input, start_seconds, end_seconds, output, true);
    let copied = match run_clip(&copy_args, token) {
        Ok(()) => true,
        Err(err @ ScribeError::Cancelled(_)) | Err(err @ ScribeError::CommandMissing { .. }) => {
            return Err(err);
        }
        Err(err) => {
            tracing::warn!(stage = "extract", error = %err, "stream copy failed, re-encoding");
            false
        }
    };

    if !copied {
        let encode_args = clip_args(input, start_seconds, end_seconds, output, false);
        run_clip(&encode_args, token)?;
    }

    Ok(())
}

fn clip_args(
    input: &Path,
    start_seconds: f64,
    end_seconds: f64,
    output: &Path,
    stream_copy: bool,
) -> Vec<String> {
    let mut args = vec![
        "-hide_banner".to_owned(),
        "-loglevel".to_owned(),
        "error".to_owned(),
        "-ss".to_owned(),
        format!("{start_seconds:.3}"),
        "-to".to_owned(),
        format!("{end_seconds:.3}"),
        "-i".to_owned(),
        input.display().to_string(),
    ];
    if stream_copy {
        args.push("-c".to_owned());
        args.push("copy".to_owned());
    } else {
        args.push("-c:a".to_owned());
        args.push("libmp3lame".to_owned());
        args.push("-q:a".to_owned());
        args.push("2".to_owned());
    }
    args.push("-y".to_owned());
    args.push(output.display().to_string());
    args
}

fn run_clip(args: &[String], token: Option<&CancelToken>) -> ScribeResult<()> {
    match token {
        Some(tok) => run_command_cancellable("ffmpeg", args, None, tok, Some(ffmpeg_timeout()))?,
        None => run_command_with_timeout("ffmpeg", args, None, Some(ffmpeg_timeout()))?,
    };
    Ok(())
}

fn ffmpeg_timeout() -> Duration {
    duration_from_env("RANGESCRIBE_FFMPEG_TIMEOUT_MS", Duration::from_secs(600))
}

fn duration_from_env(key: &str, fallback: Duration) -> Duration {
    let Ok(raw) = std::env::var(key) else {
        return fallback;
    };
    let Ok(parsed) = raw.parse::<u64>() else {
        return fallback;
    };
    Duration::from_millis(parsed)
}
