//! Runtime configuration.
//!
//! All options have defaults tuned for long-form speech recordings stored as
//! 128 kbps MP3. A TOML file can override any subset; `validate()` runs after
//! loading and before a pipeline is built.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ScribeError, ScribeResult};

/// Chunk-cache sizing and expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of chunk transcripts held at once.
    pub max_size: usize,
    /// Entries older than this are dropped on access.
    pub ttl_hours: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            ttl_hours: 24,
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_hours * 3600)
    }
}

/// Transcription-service client settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhisperConfig {
    pub base_url: String,
    pub connect_timeout_secs: u64,
    /// Generous: a one-hour chunk can take minutes to transcribe.
    pub read_timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9000".to_owned(),
            connect_timeout_secs: 10,
            read_timeout_secs: 600,
            max_retries: 3,
        }
    }
}

/// Object-store endpoint settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectStoreConfig {
    pub endpoint: String,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9100".to_owned(),
            connect_timeout_secs: 10,
            read_timeout_secs: 300,
        }
    }
}

/// Top-level configuration for the transcription pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScribeConfig {
    /// Hard upper bound per chunk in both chunking modes.
    pub max_chunk_seconds: f64,
    /// Tail shared between adjacent chunks in overlap mode; also the window
    /// the merger tokenises.
    pub overlap_seconds: f64,
    /// dBFS threshold below which audio counts as silence (negative).
    pub silence_noise_db: f64,
    /// Minimum silence length considered a usable pause.
    pub silence_min_duration: f64,
    /// Tail window of each planner pass searched for a silence breakpoint.
    pub lookback_seconds: f64,
    /// Shortest common word run accepted as an overlap match.
    pub min_match_words: usize,
    /// Time-to-byte estimation constant. 16 000 B/s matches 128 kbps audio.
    pub bytes_per_second: u64,
    pub temp_dir: PathBuf,
    pub max_file_duration_hours: u64,
    /// Full runs allowed in parallel (enforced by the embedding service).
    pub concurrent_runs: usize,
    pub cache: CacheConfig,
    pub whisper: WhisperConfig,
    pub object_store: ObjectStoreConfig,
}

impl Default for ScribeConfig {
    fn default() -> Self {
        Self {
            max_chunk_seconds: 3600.0,
            overlap_seconds: 30.0,
            silence_noise_db: -30.0,
            silence_min_duration: 2.0,
            lookback_seconds: 600.0,
            min_match_words: 3,
            bytes_per_second: 16_000,
            temp_dir: std::env::temp_dir().join("rangescribe"),
            max_file_duration_hours: 24,
            concurrent_runs: 2,
            cache: CacheConfig::default(),
            whisper: WhisperConfig::default(),
            object_store: ObjectStoreConfig::default(),
        }
    }
}

impl ScribeConfig {
    /// Load from a TOML file, falling back to defaults for absent keys.
    pub fn load(path: &Path) -> ScribeResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check structural soundness before any work starts.
    pub fn validate(&self) -> ScribeResult<()> {
        if self.max_chunk_seconds <= 0.0 {
            return Err(ScribeError::InvalidRequest(
                "max_chunk_seconds must be positive".to_owned(),
            ));
        }
        if self.overlap_seconds < 0.0 {
            return Err(ScribeError::InvalidRequest(
                "overlap_seconds must not be negative".to_owned(),
            ));
        }
        if self.overlap_seconds >= self.max_chunk_seconds {
            return Err(ScribeError::InvalidRequest(format!(
                "overlap ({}s) must be less than max chunk duration ({}s)",
                self.overlap_seconds, self.max_chunk_seconds
            )));
        }
        if self.silence_min_duration <= 0.0 {
            return Err(ScribeError::InvalidRequest(
                "silence_min_duration must be positive".to_owned(),
            ));
        }
        if self.silence_noise_db >= 0.0 {
            return Err(ScribeError::InvalidRequest(
                "silence_noise_db must be negative (dBFS)".to_owned(),
            ));
        }
        if self.lookback_seconds <= 0.0 {
            return Err(ScribeError::InvalidRequest(
                "lookback_seconds must be positive".to_owned(),
            ));
        }
        if self.min_match_words == 0 {
            return Err(ScribeError::InvalidRequest(
                "min_match_words must be at least 1".to_owned(),
            ));
        }
        if self.bytes_per_second == 0 {
            return Err(ScribeError::InvalidRequest(
                "bytes_per_second must be positive".to_owned(),
            ));
        }
        if self.max_file_duration_hours == 0 {
            return Err(ScribeError::InvalidRequest(
                "max_file_duration_hours must be positive".to_owned(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn max_file_duration_seconds(&self) -> u64 {
        self.max_file_duration_hours * 3600
    }
}
