//! Transcription-service client.
//!
//! One call per chunk: multipart upload of the audio body plus the chunk's
//! duration and index, JSON response with chunk-relative segments and the
//! detected language. Retries are internal to this module; callers see a
//! single success or a final error.

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::WhisperConfig;
use crate::error::{ScribeError, ScribeResult};
use crate::model::TranscribeResponse;

pub trait Transcriber: Send + Sync {
    /// Transcribe one local audio chunk. Idempotent per (chunk index,
    /// file content).
    fn transcribe(
        &self,
        audio_path: &Path,
        chunk_duration_seconds: f64,
        chunk_index: u32,
    ) -> ScribeResult<TranscribeResponse>;
}

/// HTTP client for a faster-whisper style transcription API.
pub struct HttpWhisperClient {
    client: reqwest::blocking::Client,
    base_url: String,
    max_retries: u32,
}

impl HttpWhisperClient {
    pub fn new(config: &WhisperConfig) -> ScribeResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.read_timeout_secs))
            .build()
            .map_err(|e| ScribeError::Transport(format!("http client build failed: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            max_retries: config.max_retries.max(1),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/v1/transcribe", self.base_url)
    }

    fn attempt(
        &self,
        audio_path: &Path,
        chunk_duration_seconds: f64,
        chunk_index: u32,
    ) -> ScribeResult<TranscribeResponse> {
        let file_part = reqwest::blocking::multipart::Part::file(audio_path)
            .map_err(ScribeError::Io)?
            .mime_str("audio/mpeg")
            .map_err(|e| ScribeError::Transport(format!("multipart mime: {e}")))?;

        let form = reqwest::blocking::multipart::Form::new()
            .part("file", file_part)
            .text("chunkDurationSeconds", chunk_duration_seconds.to_string())
            .text("chunkIndex", chunk_index.to_string());

        let url = self.endpoint();
        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .map_err(|e| ScribeError::Transport(format!("post {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            if status.is_client_error() {
                // The service judged our request malformed; retrying the
                // same bytes cannot help.
                return Err(ScribeError::InvalidRequest(format!(
                    "transcription service rejected chunk {chunk_index} (status {status}): {body}"
                )));
            }
            return Err(ScribeError::Transport(format!(
                "transcription service error for chunk {chunk_index} (status {status}): {body}"
            )));
        }

        let parsed: TranscribeResponse = response
            .json()
            .map_err(|e| ScribeError::Transport(format!("transcription response parse: {e}")))?;
        Ok(parsed)
    }
}

impl Transcriber for HttpWhisperClient {
    fn transcribe(
        &self,
        audio_path: &Path,
        chunk_duration_seconds: f64,
        chunk_index: u32,
    ) -> ScribeResult<TranscribeResponse> {
        tracing::info!(
            stage = "transcribe",
            chunk_index,
            duration = chunk_duration_seconds,
            file = %audio_path.display(),
            "sending chunk"
        );

        let mut last_error: Option<ScribeError> = None;
        for attempt in 0..self.max_retries {
            match self.attempt(audio_path, chunk_duration_seconds, chunk_index) {
                Ok(response) => {
                    tracing::info!(
                        stage = "transcribe",
                        chunk_index,
                        segments = response.segments.len(),
                        language = %response.language,
                        "chunk transcribed"
                    );
                    return Ok(response);
                }
                Err(err) if err.is_transient() && attempt + 1 < self.max_retries => {
                    let delay = backoff_delay(attempt + 1);
                    tracing::warn!(
                        stage = "transcribe",
                        chunk_index,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying"
                    );
                    last_error = Some(err);
                    std::thread::sleep(delay);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ScribeError::Transport(format!(
                "transcription failed after {} attempts",
                self.max_retries
            ))
        }))
    }
}

/// Exponential backoff with sub-second jitter: `2^attempt` seconds plus up
/// to 999 ms derived from the wall clock.
fn backoff_delay(attempt: u32) -> Duration {
    let base_ms = 1000u64.saturating_mul(1u64 << attempt.min(10));
    let jitter_ms = u64::from(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_millis(),
    );
    Duration::from_millis(base_ms + jitter_ms)
}
