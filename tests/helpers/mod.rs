#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rangescribe::backpressure::{BackpressureGate, MemorySample};
use rangescribe::cache::ChunkCache;
use rangescribe::config::{CacheConfig, ScribeConfig};
use rangescribe::error::{ScribeError, ScribeResult};
use rangescribe::model::{
    ObjectMetadata, SilenceInterval, TranscribeResponse, TranscriptSegment,
};
use rangescribe::object_store::ObjectStore;
use rangescribe::pipeline::CancelToken;
use rangescribe::silence::SilenceAnalyzer;
use rangescribe::whisper::Transcriber;

/// In-memory object store. Ranged reads return a window header
/// (`<start_byte>:<len>\n`) so scripted analyzers can reconstruct which
/// window of the recording they were handed.
pub struct MemoryObjectStore {
    file_size: u64,
    missing: bool,
}

impl MemoryObjectStore {
    pub fn with_size(file_size: u64) -> Self {
        Self {
            file_size,
            missing: false,
        }
    }

    pub fn missing() -> Self {
        Self {
            file_size: 0,
            missing: true,
        }
    }
}

impl ObjectStore for MemoryObjectStore {
    fn head(&self, bucket: &str, key: &str) -> ScribeResult<ObjectMetadata> {
        if self.missing {
            return Err(ScribeError::NotFound {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
            });
        }
        Ok(ObjectMetadata {
            content_length: self.file_size,
            content_type: Some("audio/mpeg".to_owned()),
        })
    }

    fn get_range(
        &self,
        bucket: &str,
        key: &str,
        start_byte: u64,
        end_byte: u64,
    ) -> ScribeResult<Box<dyn Read + Send>> {
        if self.missing {
            return Err(ScribeError::NotFound {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
            });
        }
        let len = end_byte.saturating_sub(start_byte) + 1;
        let mut body = format!("{start_byte}:{len}\n").into_bytes();
        body.resize(body.len().max(64), b'0');
        Ok(Box::new(std::io::Cursor::new(body)))
    }

    fn presign(&self, bucket: &str, key: &str, _ttl: Duration) -> ScribeResult<String> {
        Ok(format!("memory://{bucket}/{key}"))
    }
}

/// Silence analyzer scripted with absolute intervals; reconstructs the
/// probed window from the store's header line and answers window-relative.
pub struct ScriptedAnalyzer {
    pub silences: Vec<SilenceInterval>,
    pub bytes_per_second: u64,
}

impl SilenceAnalyzer for ScriptedAnalyzer {
    fn analyze(
        &self,
        input: &Path,
        _token: Option<&CancelToken>,
    ) -> ScribeResult<Vec<SilenceInterval>> {
        let contents = std::fs::read_to_string(input).expect("window file readable");
        let header = contents.lines().next().expect("header line");
        let mut parts = header.split(':');
        let start_byte: u64 = parts.next().expect("start").parse().expect("numeric start");
        let len: u64 = parts.next().expect("len").parse().expect("numeric len");
        let window_start = start_byte as f64 / self.bytes_per_second as f64;
        let window_end = window_start + len as f64 / self.bytes_per_second as f64;

        Ok(self
            .silences
            .iter()
            .filter(|s| s.start >= window_start && s.end <= window_end)
            .map(|s| s.offset_by(-window_start))
            .collect())
    }
}

/// Analyzer that always fails, for surfacing `AnalysisFailed`.
pub struct FailingAnalyzer;

impl SilenceAnalyzer for FailingAnalyzer {
    fn analyze(
        &self,
        _input: &Path,
        _token: Option<&CancelToken>,
    ) -> ScribeResult<Vec<SilenceInterval>> {
        Err(ScribeError::AnalysisFailed("scripted tool failure".to_owned()))
    }
}

/// Transcriber producing deterministic per-chunk segments, with optional
/// scripted responses, scripted failures, and a call hook.
pub struct ScriptedTranscriber {
    pub responses: Mutex<HashMap<u32, Vec<TranscriptSegment>>>,
    pub fail_on: Mutex<Vec<u32>>,
    pub calls: AtomicU32,
    pub call_log: Mutex<Vec<u32>>,
    pub on_call: Option<Box<dyn Fn(u32) + Send + Sync>>,
}

impl ScriptedTranscriber {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            fail_on: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
            call_log: Mutex::new(Vec::new()),
            on_call: None,
        }
    }

    pub fn with_response(self, chunk_index: u32, segments: Vec<TranscriptSegment>) -> Self {
        self.responses
            .lock()
            .expect("responses lock")
            .insert(chunk_index, segments);
        self
    }

    pub fn failing_on(self, chunk_index: u32) -> Self {
        self.fail_on.lock().expect("fail_on lock").push(chunk_index);
        self
    }

    pub fn with_hook(mut self, hook: Box<dyn Fn(u32) + Send + Sync>) -> Self {
        self.on_call = Some(hook);
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_seen(&self) -> Vec<u32> {
        self.call_log.lock().expect("call_log lock").clone()
    }
}

impl Default for ScriptedTranscriber {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcriber for ScriptedTranscriber {
    fn transcribe(
        &self,
        audio_path: &Path,
        chunk_duration_seconds: f64,
        chunk_index: u32,
    ) -> ScribeResult<TranscribeResponse> {
        assert!(
            audio_path.exists(),
            "chunk file must exist while transcribing"
        );
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_log
            .lock()
            .expect("call_log lock")
            .push(chunk_index);
        if let Some(hook) = &self.on_call {
            hook(chunk_index);
        }
        if self
            .fail_on
            .lock()
            .expect("fail_on lock")
            .contains(&chunk_index)
        {
            return Err(ScribeError::Transport(format!(
                "scripted failure for chunk {chunk_index}"
            )));
        }

        let segments = self
            .responses
            .lock()
            .expect("responses lock")
            .get(&chunk_index)
            .cloned()
            .unwrap_or_else(|| {
                vec![TranscriptSegment::new(
                    0.0,
                    chunk_duration_seconds,
                    format!("spoken content of chunk {chunk_index}"),
                )]
            });

        Ok(TranscribeResponse {
            segments,
            language: "en".to_owned(),
        })
    }
}

/// Gate whose sampler always reports calm memory.
pub fn quiet_gate() -> BackpressureGate {
    BackpressureGate::with_sampler(Box::new(|| {
        Some(MemorySample {
            used_bytes: 100,
            max_bytes: 1000,
        })
    }))
}

/// Test config: small chunks, fast constants, isolated temp dir.
pub fn test_config(temp_dir: &Path) -> ScribeConfig {
    ScribeConfig {
        max_chunk_seconds: 60.0,
        overlap_seconds: 5.0,
        lookback_seconds: 20.0,
        bytes_per_second: 1000,
        temp_dir: temp_dir.to_path_buf(),
        cache: CacheConfig {
            max_size: 100,
            ttl_hours: 24,
        },
        ..ScribeConfig::default()
    }
}

pub fn shared_cache() -> Arc<ChunkCache> {
    Arc::new(ChunkCache::new(&CacheConfig {
        max_size: 100,
        ttl_hours: 24,
    }))
}

pub fn seg(start: f64, end: f64, text: &str) -> TranscriptSegment {
    TranscriptSegment::new(start, end, text)
}
