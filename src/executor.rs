//! Chunk execution: fetch, transcribe, cache.
//!
//! The executor is where the resume story lives: the cache is consulted
//! before any bytes move, so a re-run after a crash skips completed chunks
//! entirely. Temp files are owned here and removed before every return.

use std::fs;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::backpressure::BackpressureGate;
use crate::cache::{cache_key, ChunkCache};
use crate::error::ScribeResult;
use crate::model::{ChunkPlan, ChunkTranscript};
use crate::object_store::{fetch_range_to_file, ObjectStore};
use crate::pipeline::CancelToken;
use crate::whisper::Transcriber;

/// Outcome of executing one plan.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedChunk {
    pub transcript: ChunkTranscript,
    pub was_cached: bool,
}

pub struct ChunkExecutor<'a> {
    store: &'a dyn ObjectStore,
    transcriber: &'a dyn Transcriber,
    cache: &'a ChunkCache,
    gate: &'a BackpressureGate,
    temp_dir: &'a Path,
    bytes_per_second: u64,
}

impl<'a> ChunkExecutor<'a> {
    pub fn new(
        store: &'a dyn ObjectStore,
        transcriber: &'a dyn Transcriber,
        cache: &'a ChunkCache,
        gate: &'a BackpressureGate,
        temp_dir: &'a Path,
        bytes_per_second: u64,
    ) -> Self {
        Self {
            store,
            transcriber,
            cache,
            gate,
            temp_dir,
            bytes_per_second,
        }
    }

    /// Execute one chunk plan: cache lookup, backpressure wait, ranged
    /// fetch, transcription, cache insert. Failures carry the chunk index.
    pub fn execute(
        &self,
        bucket: &str,
        key: &str,
        plan: &ChunkPlan,
        file_size: u64,
        token: Option<&CancelToken>,
    ) -> ScribeResult<ExecutedChunk> {
        self.execute_inner(bucket, key, plan, file_size, token)
            .map_err(|e| e.for_chunk(plan.chunk_index))
    }

    fn execute_inner(
        &self,
        bucket: &str,
        key: &str,
        plan: &ChunkPlan,
        file_size: u64,
        token: Option<&CancelToken>,
    ) -> ScribeResult<ExecutedChunk> {
        if let Some(tok) = token {
            tok.checkpoint()?;
        }

        let cache_key = cache_key(
            bucket,
            key,
            plan.chunk_index,
            plan.start_seconds,
            plan.end_seconds,
        );

        if let Some(transcript) = self.cache.get(&cache_key) {
            tracing::info!(
                stage = "execute",
                chunk_index = plan.chunk_index,
                "chunk served from cache"
            );
            return Ok(ExecutedChunk {
                transcript,
                was_cached: true,
            });
        }

        self.gate.wait_if_needed(token)?;

        let (start_byte, end_byte) = self.byte_range(plan, file_size);
        tracing::debug!(
            stage = "execute",
            chunk_index = plan.chunk_index,
            start_byte,
            end_byte,
            kb = (end_byte - start_byte) / 1024,
            "downloading chunk byte range"
        );

        fs::create_dir_all(self.temp_dir)?;
        let chunk_file = self.chunk_temp_path(plan.chunk_index);

        let outcome = fetch_range_to_file(
            self.store,
            bucket,
            key,
            start_byte,
            end_byte,
            &chunk_file,
        )
        .and_then(|_| {
            self.transcriber
                .transcribe(&chunk_file, plan.duration(), plan.chunk_index)
        });

        // Delete before returning on success AND failure; the on-disk
        // working set must stay bounded no matter what.
        if let Err(err) = fs::remove_file(&chunk_file) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    stage = "execute",
                    file = %chunk_file.display(),
                    error = %err,
                    "failed to remove chunk temp file"
                );
            }
        }

        let response = outcome?;
        let transcript = ChunkTranscript {
            chunk_index: plan.chunk_index,
            start_offset: plan.start_seconds,
            segments: response.segments,
            language: response.language,
        };

        self.cache.put(cache_key, transcript.clone());

        Ok(ExecutedChunk {
            transcript,
            was_cached: false,
        })
    }

    /// Byte range for a plan with a one-second bleed on both ends so frame
    /// boundaries stay intact despite the bytes-per-second approximation.
    fn byte_range(&self, plan: &ChunkPlan, file_size: u64) -> (u64, u64) {
        let bps = self.bytes_per_second as f64;
        let bleed = self.bytes_per_second;
        let start_byte = ((plan.start_seconds * bps) as u64).saturating_sub(bleed);
        let end_byte = ((plan.end_seconds * bps) as u64)
            .saturating_add(bleed)
            .min(file_size.saturating_sub(1));
        (start_byte, end_byte)
    }

    fn chunk_temp_path(&self, chunk_index: u32) -> PathBuf {
        self.temp_dir
            .join(format!("chunk_{chunk_index}_{}.mp3", Uuid::new_v4()))
    }
}
