//! Run orchestration.
//!
//! A run moves through `Pending → Running → Planning → Processing →
//! Merging → Completed`, or to `Failed` on the first fatal error. The
//! planner runs on its own thread and feeds an ordered, bounded queue of
//! chunk plans; the executor drains the queue strictly in index order, so
//! planning chunk N+1 overlaps transcribing chunk N in wall time while the
//! merge still sees chunks in sequence.
//!
//! All collaborators are passed in explicitly; the pipeline owns no global
//! state. The chunk cache is the only thing shared between runs.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::bounded;
use uuid::Uuid;

use crate::backpressure::BackpressureGate;
use crate::cache::ChunkCache;
use crate::config::ScribeConfig;
use crate::error::{ScribeError, ScribeResult};
use crate::executor::{ChunkExecutor, ExecutedChunk};
use crate::merge;
use crate::model::{
    ChunkInfo, ChunkPlan, ChunkTranscript, ExtractedClip, PlanPreview, RunDiagnostics, RunState,
    TranscriptionOutcome, TranscriptionRequest,
};
use crate::object_store::{fetch_range_to_file, ObjectStore};
use crate::planner::{PlanContext, Planner};
use crate::silence::{extract_clip, SilenceAnalyzer};
use crate::whisper::Transcriber;

/// Plans buffered between the planner thread and the executor. Plans are
/// tiny; this only bounds how far planning may run ahead.
const PLAN_QUEUE_DEPTH: usize = 4;

/// Cooperative cancellation signal. Clone freely; all clones observe the
/// same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Return `Err(Cancelled)` once the signal is raised. Called at every
    /// suspension point so in-flight work stops at the next opportunity.
    pub fn checkpoint(&self) -> ScribeResult<()> {
        if self.is_cancelled() {
            return Err(ScribeError::Cancelled(
                "cancellation signal observed".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Shared handle for observing and steering a run from another thread.
#[derive(Debug)]
pub struct RunControl {
    token: CancelToken,
    state: Mutex<RunState>,
    planned: AtomicUsize,
    completed: AtomicUsize,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    #[must_use]
    pub fn new() -> Self {
        Self {
            token: CancelToken::new(),
            state: Mutex::new(RunState::Pending),
            planned: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    /// Request cancellation: no new chunks start, in-flight external calls
    /// are allowed to finish, the run fails with `Cancelled`.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn state(&self) -> RunState {
        *self.state.lock().expect("run state lock")
    }

    /// Fraction of discovered plans whose chunks have been executed. Not
    /// monotonic across restarts: a warm cache completes early plans
    /// instantly.
    #[must_use]
    pub fn progress(&self) -> f64 {
        let planned = self.planned.load(Ordering::SeqCst);
        if planned == 0 {
            return 0.0;
        }
        self.completed.load(Ordering::SeqCst) as f64 / planned as f64
    }

    fn set_state(&self, next: RunState) {
        let mut state = self.state.lock().expect("run state lock");
        tracing::debug!(from = %state, to = %next, "run state transition");
        *state = next;
    }

    fn record_planned(&self) {
        self.planned.fetch_add(1, Ordering::SeqCst);
    }

    fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
}

/// The streaming transcription pipeline.
pub struct Pipeline {
    config: ScribeConfig,
    store: Arc<dyn ObjectStore>,
    transcriber: Arc<dyn Transcriber>,
    analyzer: Arc<dyn SilenceAnalyzer>,
    cache: Arc<ChunkCache>,
    gate: Arc<BackpressureGate>,
}

impl Pipeline {
    /// Build a pipeline from explicit collaborators. Fails fast on an
    /// invalid configuration.
    pub fn new(
        config: ScribeConfig,
        store: Arc<dyn ObjectStore>,
        transcriber: Arc<dyn Transcriber>,
        analyzer: Arc<dyn SilenceAnalyzer>,
        cache: Arc<ChunkCache>,
        gate: Arc<BackpressureGate>,
    ) -> ScribeResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            transcriber,
            analyzer,
            cache,
            gate,
        })
    }

    #[must_use]
    pub fn config(&self) -> &ScribeConfig {
        &self.config
    }

    #[must_use]
    pub fn cache(&self) -> &ChunkCache {
        &self.cache
    }

    /// Run a transcription to completion with an internal control handle.
    pub fn transcribe(&self, request: &TranscriptionRequest) -> ScribeResult<TranscriptionOutcome> {
        self.transcribe_controlled(request, &RunControl::new())
    }

    /// Run a transcription under an external [`RunControl`], which exposes
    /// progress and accepts cancellation.
    pub fn transcribe_controlled(
        &self,
        request: &TranscriptionRequest,
        control: &RunControl,
    ) -> ScribeResult<TranscriptionOutcome> {
        let run_id = Uuid::new_v4().to_string();
        let started_at = chrono::Utc::now();
        control.set_state(RunState::Running);

        match self.run(request, control, &run_id) {
            Ok(mut outcome) => {
                control.set_state(RunState::Completed);
                outcome.run_id = run_id;
                outcome.started_at_rfc3339 = started_at.to_rfc3339();
                outcome.finished_at_rfc3339 = chrono::Utc::now().to_rfc3339();
                Ok(outcome)
            }
            Err(err) => {
                control.set_state(RunState::Failed);
                tracing::error!(
                    run_id = %run_id,
                    code = err.error_code(),
                    chunk_index = err.chunk_index(),
                    error = %err,
                    "run failed"
                );
                Err(err)
            }
        }
    }

    fn run(
        &self,
        request: &TranscriptionRequest,
        control: &RunControl,
        run_id: &str,
    ) -> ScribeResult<TranscriptionOutcome> {
        validate_request(request)?;
        let token = control.token().clone();

        tracing::info!(
            run_id,
            bucket = %request.bucket,
            key = %request.key,
            mode = %request.mode,
            "starting transcription run"
        );

        let ctx = self.describe_object(request)?;
        tracing::info!(
            run_id,
            file_size = ctx.file_size,
            estimated_duration = format!("{:.1}", ctx.total_duration),
            "object described"
        );

        control.set_state(RunState::Planning);
        fs::create_dir_all(&self.config.temp_dir)?;

        control.set_state(RunState::Processing);
        tracing::info!(run_id, memory = %self.gate.memory_stats_line(), "processing chunks");
        let (plans, executed) = self.plan_and_execute(request, &ctx, control, &token)?;
        crate::planner::check_plan_invariants(&plans, ctx.total_duration)
            .map_err(ScribeError::Internal)?;

        control.set_state(RunState::Merging);
        let transcripts: Vec<ChunkTranscript> =
            executed.iter().map(|e| e.transcript.clone()).collect();
        let segments = merge::merge(request.mode, &transcripts, self.config.min_match_words);
        merge::check_monotonic(&segments).map_err(ScribeError::Internal)?;

        let cached_chunks = executed.iter().filter(|e| e.was_cached).count();
        if cached_chunks > 0 {
            tracing::info!(
                run_id,
                cached_chunks,
                total = plans.len(),
                "resumed chunks from cache"
            );
        }

        let language = transcripts
            .first()
            .map(|t| t.language.clone())
            .unwrap_or_else(|| "unknown".to_owned());

        let chunks: Vec<ChunkInfo> = plans
            .iter()
            .zip(transcripts.iter())
            .map(|(plan, transcript)| ChunkInfo {
                chunk_index: plan.chunk_index,
                start_seconds: plan.start_seconds,
                end_seconds: plan.end_seconds,
                segment_count: transcript.segments.len(),
            })
            .collect();
        let total_segments = transcripts.iter().map(|t| t.segments.len()).sum();

        tracing::info!(
            run_id,
            segments = segments.len(),
            memory = %self.gate.memory_stats_line(),
            "transcription complete"
        );

        Ok(TranscriptionOutcome {
            run_id: run_id.to_owned(),
            started_at_rfc3339: String::new(),
            finished_at_rfc3339: String::new(),
            mode: request.mode,
            language,
            segments,
            diagnostics: RunDiagnostics {
                chunk_count: plans.len(),
                estimated_duration_seconds: ctx.total_duration,
                total_segments,
                cached_chunks,
                chunks,
            },
        })
    }

    /// Planner thread feeding a bounded queue; executor draining it in
    /// order on this thread.
    fn plan_and_execute(
        &self,
        request: &TranscriptionRequest,
        ctx: &PlanContext,
        control: &RunControl,
        token: &CancelToken,
    ) -> ScribeResult<(Vec<ChunkPlan>, Vec<ExecutedChunk>)> {
        let executor = ChunkExecutor::new(
            self.store.as_ref(),
            self.transcriber.as_ref(),
            &self.cache,
            &self.gate,
            &self.config.temp_dir,
            self.config.bytes_per_second,
        );

        let (tx, rx) = bounded::<ScribeResult<ChunkPlan>>(PLAN_QUEUE_DEPTH);
        let planner_token = token.clone();
        let mode = request.mode;

        std::thread::scope(|scope| {
            let planner_thread = scope.spawn(move || {
                let planner = Planner::new(
                    self.store.as_ref(),
                    self.analyzer.as_ref(),
                    &self.config.temp_dir,
                    self.config.max_chunk_seconds,
                    self.config.overlap_seconds,
                    self.config.lookback_seconds,
                    self.config.bytes_per_second,
                    self.config.silence_min_duration,
                );
                let outcome = planner.stream_plans(mode, ctx, Some(&planner_token), |plan| {
                    tx.send(Ok(plan)).map_err(|_| {
                        // Receiver is gone; the run is already failing.
                        ScribeError::Cancelled("plan queue closed".to_owned())
                    })
                });
                if let Err(err) = outcome {
                    match err {
                        ScribeError::Cancelled(_) => {}
                        other => {
                            let _ = tx.send(Err(other));
                        }
                    }
                }
            });

            let mut plans = Vec::new();
            let mut executed = Vec::new();
            let mut failure: Option<ScribeError> = None;

            for message in &rx {
                match message {
                    Ok(plan) => {
                        control.record_planned();
                        tracing::info!(
                            chunk_index = plan.chunk_index,
                            start = format!("{:.1}", plan.start_seconds),
                            end = format!("{:.1}", plan.end_seconds),
                            "processing chunk"
                        );
                        match executor.execute(
                            &request.bucket,
                            &request.key,
                            &plan,
                            ctx.file_size,
                            Some(token),
                        ) {
                            Ok(chunk) => {
                                control.record_completed();
                                tracing::info!(
                                    chunk_index = plan.chunk_index,
                                    cached = chunk.was_cached,
                                    progress = format!("{:.0}%", control.progress() * 100.0),
                                    memory = %self.gate.memory_stats_line(),
                                    "chunk done"
                                );
                                plans.push(plan);
                                executed.push(chunk);
                            }
                            Err(err) => {
                                failure = Some(err);
                                break;
                            }
                        }
                    }
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                }
            }

            // Unblock the planner if we bailed early, then reap it.
            drop(rx);
            if failure.is_some() {
                token.cancel();
            }
            if planner_thread.join().is_err() {
                return Err(ScribeError::Internal("planner thread panicked".to_owned()));
            }

            match failure {
                Some(err) => Err(err),
                None => Ok((plans, executed)),
            }
        })
    }

    /// Plan chunks without transcribing anything.
    pub fn preview(&self, request: &TranscriptionRequest) -> ScribeResult<PlanPreview> {
        validate_request(request)?;
        let ctx = self.describe_object(request)?;

        let planner = Planner::new(
            self.store.as_ref(),
            self.analyzer.as_ref(),
            &self.config.temp_dir,
            self.config.max_chunk_seconds,
            self.config.overlap_seconds,
            self.config.lookback_seconds,
            self.config.bytes_per_second,
            self.config.silence_min_duration,
        );
        let plans = planner.plan(request.mode, &ctx, None)?;

        Ok(PlanPreview {
            estimated_duration_seconds: ctx.total_duration,
            mode: request.mode,
            plans,
        })
    }

    /// Cut `[start, end]` of a remote recording into a local MP3: ranged
    /// fetch with the usual one-second bleed, then an exact-time trim.
    pub fn extract(
        &self,
        bucket: &str,
        key: &str,
        start_seconds: f64,
        end_seconds: f64,
        output: &Path,
    ) -> ScribeResult<ExtractedClip> {
        if bucket.is_empty() || key.is_empty() {
            return Err(ScribeError::InvalidRequest(
                "bucket and key must not be empty".to_owned(),
            ));
        }
        if end_seconds <= start_seconds || start_seconds < 0.0 {
            return Err(ScribeError::InvalidRequest(format!(
                "invalid extract range {start_seconds}s..{end_seconds}s"
            )));
        }

        let metadata = self.store.head(bucket, key)?;
        let bps = self.config.bytes_per_second;
        let start_byte = ((start_seconds * bps as f64) as u64).saturating_sub(bps);
        let end_byte = ((end_seconds * bps as f64) as u64)
            .saturating_add(bps)
            .min(metadata.content_length.saturating_sub(1));

        fs::create_dir_all(&self.config.temp_dir)?;
        let fetched = self
            .config
            .temp_dir
            .join(format!("extract_{}.mp3", Uuid::new_v4()));

        let outcome = fetch_range_to_file(
            self.store.as_ref(),
            bucket,
            key,
            start_byte,
            end_byte,
            &fetched,
        )
        .and_then(|_| {
            // The fetched file starts earlier than the requested range by
            // however much the bleed added; trim relative to that.
            let fetched_start = start_byte as f64 / bps as f64;
            extract_clip(
                &fetched,
                start_seconds - fetched_start,
                end_seconds - fetched_start,
                output,
                None,
            )
        });

        if let Err(err) = fs::remove_file(&fetched) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(file = %fetched.display(), error = %err, "failed to remove extract temp file");
            }
        }
        outcome?;

        Ok(ExtractedClip {
            path: PathBuf::from(output),
            start_seconds,
            end_seconds,
        })
    }

    /// HEAD the object and derive the planning context, enforcing the
    /// duration ceiling before any chunk is fetched.
    fn describe_object(&self, request: &TranscriptionRequest) -> ScribeResult<PlanContext> {
        let metadata = self.store.head(&request.bucket, &request.key)?;
        if metadata.content_length == 0 {
            return Err(ScribeError::InvalidRequest(format!(
                "object {}/{} is empty",
                request.bucket, request.key
            )));
        }

        let total_duration = metadata.content_length as f64 / self.config.bytes_per_second as f64;
        let max_seconds = self.config.max_file_duration_seconds();
        if total_duration > max_seconds as f64 {
            return Err(ScribeError::TooLong {
                estimated_seconds: total_duration,
                max_seconds,
            });
        }

        Ok(PlanContext {
            bucket: request.bucket.clone(),
            key: request.key.clone(),
            file_size: metadata.content_length,
            total_duration,
        })
    }
}

fn validate_request(request: &TranscriptionRequest) -> ScribeResult<()> {
    if request.bucket.trim().is_empty() {
        return Err(ScribeError::InvalidRequest(
            "bucket must not be empty".to_owned(),
        ));
    }
    if request.key.trim().is_empty() {
        return Err(ScribeError::InvalidRequest(
            "key must not be empty".to_owned(),
        ));
    }
    Ok(())
}
