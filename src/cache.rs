//! Chunk-transcript cache.
//!
//! Keyed by (bucket, key, chunk index, start, end) so a re-run with an
//! identical plan skips the transcribe call entirely; that is the whole
//! resume story after a crash. Entries expire after a TTL and the map is
//! capped, evicting oldest entries first. Last writer wins on races.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::CacheConfig;
use crate::model::ChunkTranscript;

/// Format the canonical cache key: `bucket:key:chunk-<i>:<start>-<end>`
/// with times at two decimal places.
#[must_use]
pub fn cache_key(
    bucket: &str,
    key: &str,
    chunk_index: u32,
    start_seconds: f64,
    end_seconds: f64,
) -> String {
    format!("{bucket}:{key}:chunk-{chunk_index}:{start_seconds:.2}-{end_seconds:.2}")
}

/// Prefix matching every chunk of one file, for whole-file eviction.
#[must_use]
pub fn file_prefix(bucket: &str, key: &str) -> String {
    format!("{bucket}:{key}:")
}

struct CacheEntry {
    transcript: ChunkTranscript,
    inserted_at: Instant,
}

/// Observable cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    /// Hit ratio in `[0, 1]`; 0 when the cache was never read.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Bounded in-memory store of per-chunk transcripts.
///
/// The sole cross-run shared mutable state in the system; all operations
/// take the inner lock, so concurrent runs can share one instance.
pub struct ChunkCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    max_size: usize,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ChunkCache {
    #[must_use]
    pub fn new(config: &CacheConfig) -> Self {
        tracing::info!(
            max_size = config.max_size,
            ttl_hours = config.ttl_hours,
            "initialized chunk cache"
        );
        Self {
            entries: Mutex::new(HashMap::new()),
            max_size: config.max_size.max(1),
            ttl: config.ttl(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up a chunk transcript. Expired entries count as misses and are
    /// removed on the spot.
    pub fn get(&self, key: &str) -> Option<ChunkTranscript> {
        let mut entries = self.entries.lock().expect("cache lock");
        match entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key, "cache hit");
                Some(entry.transcript.clone())
            }
            Some(_) => {
                entries.remove(key);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key, "cache entry expired");
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key, "cache miss");
                None
            }
        }
    }

    /// Insert a transcript, evicting the oldest entries if the cap is hit.
    pub fn put(&self, key: impl Into<String>, transcript: ChunkTranscript) {
        let key = key.into();
        let mut entries = self.entries.lock().expect("cache lock");

        while entries.len() >= self.max_size && !entries.contains_key(&key) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(old_key) => {
                    entries.remove(&old_key);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(key = %old_key, "evicted oldest cache entry");
                }
                None => break,
            }
        }

        tracing::debug!(key = %key, segments = transcript.segments.len(), "cached chunk");
        entries.insert(
            key,
            CacheEntry {
                transcript,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn evict(&self, key: &str) {
        let mut entries = self.entries.lock().expect("cache lock");
        if entries.remove(key).is_some() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Drop every cached chunk belonging to one object.
    pub fn evict_all_for_file(&self, bucket: &str, key: &str) {
        let prefix = file_prefix(bucket, key);
        let mut entries = self.entries.lock().expect("cache lock");
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(&prefix));
        let removed = before - entries.len();
        self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        tracing::info!(bucket, key, removed, "evicted file from chunk cache");
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let size = self.entries.lock().expect("cache lock").len();
        CacheStats {
            size,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
