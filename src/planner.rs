//! Chunk planning.
//!
//! Two strategies behind [`ChunkingMode`]:
//!
//! - **Greedy silence-aware**: a single forward pass over the remote file.
//!   Each iteration streams up to `max_chunk_seconds` of estimated bytes to
//!   a temp file, probes it for silence, and cuts at the longest pause in
//!   the lookback tail (or force-cuts at the window end). Only the tail is
//!   searched so every chunk stays under the cap, and plans are emitted as
//!   they are discovered: the executor can already be transcribing chunk N
//!   while chunk N+1 is being planned.
//! - **Overlap**: fixed intervals that extend `overlap_seconds` past their
//!   nominal end; purely arithmetic, no probing.

use std::fs;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::ScribeResult;
use crate::model::{Breakpoint, ChunkPlan, ChunkingMode, SilenceInterval};
use crate::object_store::{fetch_range_to_file, ObjectStore};
use crate::pipeline::CancelToken;
use crate::silence::SilenceAnalyzer;

/// Stop planning when the cursor is within this many seconds of the end;
/// the remainder is folded into the final plan.
const END_EPSILON_SECONDS: f64 = 1.0;

/// Inputs shared by both strategies.
#[derive(Debug, Clone)]
pub struct PlanContext {
    pub bucket: String,
    pub key: String,
    pub file_size: u64,
    pub total_duration: f64,
}

/// Plans chunks for a remote object.
pub struct Planner<'a> {
    store: &'a dyn ObjectStore,
    analyzer: &'a dyn SilenceAnalyzer,
    temp_dir: &'a Path,
    max_chunk_seconds: f64,
    overlap_seconds: f64,
    lookback_seconds: f64,
    bytes_per_second: u64,
    min_silence_duration: f64,
}

impl<'a> Planner<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: &'a dyn ObjectStore,
        analyzer: &'a dyn SilenceAnalyzer,
        temp_dir: &'a Path,
        max_chunk_seconds: f64,
        overlap_seconds: f64,
        lookback_seconds: f64,
        bytes_per_second: u64,
        min_silence_duration: f64,
    ) -> Self {
        Self {
            store,
            analyzer,
            temp_dir,
            max_chunk_seconds,
            overlap_seconds,
            lookback_seconds,
            bytes_per_second,
            min_silence_duration,
        }
    }

    /// Plan all chunks up front. Convenience wrapper over
    /// [`Planner::stream_plans`] for previews and tests.
    pub fn plan(
        &self,
        mode: ChunkingMode,
        ctx: &PlanContext,
        token: Option<&CancelToken>,
    ) -> ScribeResult<Vec<ChunkPlan>> {
        let mut plans = Vec::new();
        self.stream_plans(mode, ctx, token, |plan| {
            plans.push(plan);
            Ok(())
        })?;
        Ok(plans)
    }

    /// Plan chunks, handing each to `emit` as soon as it is known. The
    /// emitted sequence is contiguous, index-ordered, and covers
    /// `[0, total_duration]`.
    pub fn stream_plans(
        &self,
        mode: ChunkingMode,
        ctx: &PlanContext,
        token: Option<&CancelToken>,
        mut emit: impl FnMut(ChunkPlan) -> ScribeResult<()>,
    ) -> ScribeResult<()> {
        match mode {
            ChunkingMode::Overlap => {
                for plan in plan_overlap_chunks(
                    ctx.total_duration,
                    self.max_chunk_seconds,
                    self.overlap_seconds,
                ) {
                    emit(plan)?;
                }
            }
            ChunkingMode::SilenceAware => {
                self.stream_silence_plans(ctx, token, &mut emit)?;
            }
        }
        tracing::info!(
            stage = "plan",
            mode = %mode,
            total_duration = ctx.total_duration,
            "chunk planning complete"
        );
        Ok(())
    }

    /// Greedy single-pass breakpoint discovery with lookback, emitting a
    /// plan per discovered breakpoint plus the final tail plan.
    fn stream_silence_plans(
        &self,
        ctx: &PlanContext,
        token: Option<&CancelToken>,
        emit: &mut impl FnMut(ChunkPlan) -> ScribeResult<()>,
    ) -> ScribeResult<()> {
        let total = ctx.total_duration;

        // Short recording: one chunk, no probing needed.
        if total < self.max_chunk_seconds {
            return emit(ChunkPlan::new(0, 0.0, total));
        }

        fs::create_dir_all(self.temp_dir)?;

        let mut previous = 0.0f64;
        let mut position = 0.0f64;
        let mut index = 0u32;

        while position < total {
            if let Some(tok) = token {
                tok.checkpoint()?;
            }

            let window_end = (position + self.max_chunk_seconds).min(total);
            tracing::info!(
                stage = "plan",
                position = format!("{position:.1}"),
                window_end = format!("{window_end:.1}"),
                "analyzing window"
            );

            let silences = self.probe_window(ctx, position, window_end, token)?;

            let lookback_start = (window_end - self.lookback_seconds).max(position);
            let breakpoint = match best_silence_in_window(&silences, lookback_start, window_end) {
                Some(silence) => {
                    let bp = Breakpoint::at_silence(silence);
                    tracing::info!(
                        stage = "plan",
                        breakpoint = format!("{:.2}", bp.position),
                        silence_duration = format!("{:.2}", silence.duration()),
                        "cut at silence midpoint"
                    );
                    bp
                }
                None => {
                    tracing::warn!(
                        stage = "plan",
                        breakpoint = format!("{window_end:.2}"),
                        "no silence in lookback window, forcing cut"
                    );
                    Breakpoint::forced(window_end)
                }
            };

            emit(ChunkPlan::new(index, previous, breakpoint.position))?;
            index += 1;
            previous = breakpoint.position;
            position = breakpoint.position;

            if position >= total - END_EPSILON_SECONDS {
                break;
            }
        }

        if previous < total {
            emit(ChunkPlan::new(index, previous, total))?;
        }
        Ok(())
    }

    /// Stream one window's bytes to a temp file, probe it, and remap the
    /// intervals to absolute recording time.
    fn probe_window(
        &self,
        ctx: &PlanContext,
        position: f64,
        window_end: f64,
        token: Option<&CancelToken>,
    ) -> ScribeResult<Vec<SilenceInterval>> {
        let bps = self.bytes_per_second as f64;
        let start_byte = (position * bps) as u64;
        let end_byte = ((window_end * bps) as u64).min(ctx.file_size.saturating_sub(1));

        let segment_file = self.window_temp_path();
        let outcome = fetch_range_to_file(
            self.store,
            &ctx.bucket,
            &ctx.key,
            start_byte,
            end_byte,
            &segment_file,
        )
        .and_then(|_| self.analyzer.analyze(&segment_file, token));

        // The planner owns exactly one temp file at a time; it never
        // outlives the window that produced it.
        if let Err(err) = fs::remove_file(&segment_file) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    stage = "plan",
                    file = %segment_file.display(),
                    error = %err,
                    "failed to remove planner temp file"
                );
            }
        }

        let raw = outcome?;
        let remapped = raw
            .iter()
            .map(|s| s.offset_by(position))
            .filter(|s| s.duration() >= self.min_silence_duration)
            .collect();
        Ok(remapped)
    }

    fn window_temp_path(&self) -> PathBuf {
        self.temp_dir
            .join(format!("greedy_segment_{}.mp3", Uuid::new_v4()))
    }
}

/// The longest silence fully contained in `[window_start, window_end]`;
/// ties go to the earlier start.
#[must_use]
pub fn best_silence_in_window(
    silences: &[SilenceInterval],
    window_start: f64,
    window_end: f64,
) -> Option<SilenceInterval> {
    silences
        .iter()
        .filter(|s| s.start >= window_start && s.end <= window_end)
        .fold(None, |best: Option<SilenceInterval>, candidate| match best {
            Some(current) if candidate.duration() > current.duration() => Some(*candidate),
            Some(current) => Some(current),
            None => Some(*candidate),
        })
}

/// Fixed-interval plans whose tails extend `overlap_seconds` into the next
/// chunk. The final chunk never extends past the end of the recording.
#[must_use]
pub fn plan_overlap_chunks(
    total_duration: f64,
    max_chunk_seconds: f64,
    overlap_seconds: f64,
) -> Vec<ChunkPlan> {
    let mut plans = Vec::new();
    let mut current_start = 0.0f64;
    let mut index = 0u32;

    while current_start < total_duration {
        let nominal_end = (current_start + max_chunk_seconds).min(total_duration);
        let actual_end = if nominal_end < total_duration {
            (nominal_end + overlap_seconds).min(total_duration)
        } else {
            nominal_end
        };

        let (overlap_start, overlap_end) = if index > 0 {
            (
                Some(current_start),
                Some((current_start + overlap_seconds).min(actual_end)),
            )
        } else {
            (None, None)
        };

        plans.push(ChunkPlan {
            chunk_index: index,
            start_seconds: current_start,
            end_seconds: actual_end,
            overlap_start,
            overlap_end,
        });

        current_start = nominal_end;
        index += 1;
    }

    plans
}

/// Validate the contiguity invariants of a plan sequence: indexes are
/// consecutive from zero, coverage starts at zero and ends at the total,
/// and each plan starts no later than its predecessor ends.
pub fn check_plan_invariants(plans: &[ChunkPlan], total_duration: f64) -> Result<(), String> {
    let Some(first) = plans.first() else {
        return if total_duration == 0.0 {
            Ok(())
        } else {
            Err("no plans for a non-empty recording".to_owned())
        };
    };

    if first.start_seconds != 0.0 {
        return Err(format!("coverage starts at {}s, not 0", first.start_seconds));
    }

    for (i, plan) in plans.iter().enumerate() {
        if plan.chunk_index != i as u32 {
            return Err(format!(
                "chunk index {} at position {i} is not contiguous",
                plan.chunk_index
            ));
        }
        if plan.end_seconds <= plan.start_seconds {
            return Err(format!("plan {i} is empty or inverted"));
        }
    }

    for pair in plans.windows(2) {
        if pair[1].start_seconds > pair[0].end_seconds {
            return Err(format!(
                "gap between plan {} (ends {}s) and plan {} (starts {}s)",
                pair[0].chunk_index, pair[0].end_seconds, pair[1].chunk_index, pair[1].start_seconds
            ));
        }
        if pair[1].start_seconds < pair[0].start_seconds {
            return Err("plan starts are not non-decreasing".to_owned());
        }
    }

    let last = plans.last().expect("non-empty checked above");
    if (last.end_seconds - total_duration).abs() > 1e-6 {
        return Err(format!(
            "coverage ends at {}s, expected {}s",
            last.end_seconds, total_duration
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::time::Duration;

    use crate::error::ScribeError;
    use crate::model::ObjectMetadata;

    #[test]
    fn best_silence_requires_full_containment() {
        let silences = vec![
            SilenceInterval::new(2990.0, 3005.0), // straddles window start
            SilenceInterval::new(3100.0, 3104.0),
            SilenceInterval::new(3595.0, 3610.0), // straddles window end
        ];
        let best = best_silence_in_window(&silences, 3000.0, 3600.0).expect("one qualifies");
        assert!((best.start - 3100.0).abs() < 1e-9);
    }

    #[test]
    fn best_silence_prefers_longest() {
        let silences = vec![
            SilenceInterval::new(3100.0, 3103.0),
            SilenceInterval::new(3200.0, 3210.0),
            SilenceInterval::new(3300.0, 3305.0),
        ];
        let best = best_silence_in_window(&silences, 3000.0, 3600.0).expect("match");
        assert!((best.duration() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn best_silence_tie_goes_to_earlier_start() {
        let silences = vec![
            SilenceInterval::new(3100.0, 3105.0),
            SilenceInterval::new(3200.0, 3205.0),
        ];
        let best = best_silence_in_window(&silences, 3000.0, 3600.0).expect("match");
        assert!((best.start - 3100.0).abs() < 1e-9);
    }

    #[test]
    fn best_silence_empty_window_is_none() {
        assert!(best_silence_in_window(&[], 0.0, 100.0).is_none());
        let silences = vec![SilenceInterval::new(500.0, 510.0)];
        assert!(best_silence_in_window(&silences, 0.0, 100.0).is_none());
    }

    #[test]
    fn overlap_plans_cover_duration_contiguously() {
        let plans = plan_overlap_chunks(7200.0, 3600.0, 30.0);
        assert_eq!(plans.len(), 2);
        assert!((plans[0].start_seconds - 0.0).abs() < 1e-9);
        assert!((plans[0].end_seconds - 3630.0).abs() < 1e-9);
        assert!((plans[1].start_seconds - 3600.0).abs() < 1e-9);
        assert!((plans[1].end_seconds - 7200.0).abs() < 1e-9);
        check_plan_invariants(&plans, 7200.0).expect("invariants hold");
    }

    #[test]
    fn overlap_plans_record_overlap_region() {
        let plans = plan_overlap_chunks(10_000.0, 3600.0, 30.0);
        assert!(plans[0].overlap_start.is_none());
        assert_eq!(plans[1].overlap_start, Some(3600.0));
        assert_eq!(plans[1].overlap_end, Some(3630.0));
        assert!(plans[1].has_overlap());
    }

    #[test]
    fn overlap_final_chunk_never_extends_past_end() {
        let plans = plan_overlap_chunks(3650.0, 3600.0, 30.0);
        assert_eq!(plans.len(), 2);
        let last = plans.last().expect("non-empty");
        assert!((last.end_seconds - 3650.0).abs() < 1e-9);
    }

    #[test]
    fn overlap_short_recording_is_single_plan() {
        let plans = plan_overlap_chunks(600.0, 3600.0, 30.0);
        assert_eq!(plans.len(), 1);
        assert!(!plans[0].has_overlap());
        assert!((plans[0].end_seconds - 600.0).abs() < 1e-9);
    }

    #[test]
    fn overlap_plans_respect_max_duration_plus_overlap() {
        let plans = plan_overlap_chunks(86_400.0, 3600.0, 30.0);
        for plan in &plans {
            assert!(plan.duration() <= 3630.0 + 1e-9, "plan too long: {plan:?}");
        }
        check_plan_invariants(&plans, 86_400.0).expect("invariants hold");
    }

    #[test]
    fn invariant_check_catches_gap() {
        let plans = vec![
            ChunkPlan::new(0, 0.0, 100.0),
            ChunkPlan::new(1, 150.0, 300.0),
        ];
        let err = check_plan_invariants(&plans, 300.0).expect_err("gap must fail");
        assert!(err.contains("gap"));
    }

    #[test]
    fn invariant_check_catches_bad_index() {
        let plans = vec![ChunkPlan::new(3, 0.0, 100.0)];
        let err = check_plan_invariants(&plans, 100.0).expect_err("index must fail");
        assert!(err.contains("contiguous"));
    }

    // ── streaming planner with scripted window contents ──
    //
    // The mock store writes the range's start byte as an ASCII header so
    // the scripted analyzer can reconstruct which window it was handed and
    // answer with window-relative silences.

    struct HeaderStore {
        file_size: u64,
    }

    impl ObjectStore for HeaderStore {
        fn head(&self, _b: &str, _k: &str) -> crate::error::ScribeResult<ObjectMetadata> {
            Ok(ObjectMetadata {
                content_length: self.file_size,
                content_type: None,
            })
        }

        fn get_range(
            &self,
            _b: &str,
            _k: &str,
            start_byte: u64,
            end_byte: u64,
        ) -> crate::error::ScribeResult<Box<dyn Read + Send>> {
            let len = (end_byte - start_byte + 1) as usize;
            let mut body = format!("{start_byte}:{len}\n").into_bytes();
            body.resize(body.len().max(64), b'0');
            Ok(Box::new(std::io::Cursor::new(body)))
        }

        fn presign(
            &self,
            _b: &str,
            _k: &str,
            _ttl: Duration,
        ) -> crate::error::ScribeResult<String> {
            Ok("header://".to_owned())
        }
    }

    struct ScriptedAnalyzer {
        /// Absolute silences across the whole recording.
        silences: Vec<SilenceInterval>,
        bytes_per_second: u64,
    }

    impl SilenceAnalyzer for ScriptedAnalyzer {
        fn analyze(
            &self,
            input: &std::path::Path,
            _token: Option<&CancelToken>,
        ) -> crate::error::ScribeResult<Vec<SilenceInterval>> {
            let contents = std::fs::read_to_string(input).expect("window file readable");
            let header = contents.lines().next().expect("header line");
            let mut parts = header.split(':');
            let start_byte: u64 = parts.next().expect("start").parse().expect("numeric");
            let len: u64 = parts.next().expect("len").parse().expect("numeric");
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

    fn planner_fixture<'a>(
        store: &'a HeaderStore,
        analyzer: &'a ScriptedAnalyzer,
        temp_dir: &'a std::path::Path,
    ) -> Planner<'a> {
        Planner::new(store, analyzer, temp_dir, 3600.0, 30.0, 600.0, 16_000, 2.0)
    }

    #[test]
    fn greedy_planner_cuts_at_silence_midpoints() {
        // 28 800 s recording with silences placed inside successive
        // lookback windows.
        let file_size = 28_800u64 * 16_000;
        let store = HeaderStore { file_size };
        let analyzer = ScriptedAnalyzer {
            silences: vec![
                SilenceInterval::new(3480.0, 3495.0),
                SilenceInterval::new(7060.0, 7080.0),
                SilenceInterval::new(10_640.0, 10_660.0),
            ],
            bytes_per_second: 16_000,
        };
        let dir = tempfile::tempdir().expect("tempdir");
        let planner = planner_fixture(&store, &analyzer, dir.path());

        let ctx = PlanContext {
            bucket: "b".to_owned(),
            key: "k.mp3".to_owned(),
            file_size,
            total_duration: 28_800.0,
        };
        let plans = planner
            .plan(ChunkingMode::SilenceAware, &ctx, None)
            .expect("planning succeeds");

        assert!((plans[0].end_seconds - 3487.5).abs() < 1e-6);
        assert!((plans[1].end_seconds - 7070.0).abs() < 1e-6);
        assert!((plans[2].end_seconds - 10_650.0).abs() < 1e-6);
        check_plan_invariants(&plans, 28_800.0).expect("invariants hold");
        // After the scripted silences run out, cuts are forced at the
        // window cap until the recording ends.
        assert!((plans[3].end_seconds - 14_250.0).abs() < 1e-6);
        assert!((plans.last().expect("plans").end_seconds - 28_800.0).abs() < 1e-6);
    }

    #[test]
    fn greedy_planner_forces_cut_when_silence_outside_lookback() {
        let file_size = 7200u64 * 16_000;
        let store = HeaderStore { file_size };
        // Silence exists, but before the lookback window [3000, 3600].
        let analyzer = ScriptedAnalyzer {
            silences: vec![SilenceInterval::new(1000.0, 1010.0)],
            bytes_per_second: 16_000,
        };
        let dir = tempfile::tempdir().expect("tempdir");
        let planner = planner_fixture(&store, &analyzer, dir.path());

        let ctx = PlanContext {
            bucket: "b".to_owned(),
            key: "k.mp3".to_owned(),
            file_size,
            total_duration: 7200.0,
        };
        let plans = planner
            .plan(ChunkingMode::SilenceAware, &ctx, None)
            .expect("planning succeeds");

        assert!((plans[0].end_seconds - 3600.0).abs() < 1e-6);
        check_plan_invariants(&plans, 7200.0).expect("invariants hold");
    }

    #[test]
    fn greedy_planner_short_recording_single_plan_without_probing() {
        let file_size = 600u64 * 16_000;
        let store = HeaderStore { file_size };
        let analyzer = ScriptedAnalyzer {
            silences: vec![SilenceInterval::new(100.0, 110.0)],
            bytes_per_second: 16_000,
        };
        let dir = tempfile::tempdir().expect("tempdir");
        let planner = planner_fixture(&store, &analyzer, dir.path());

        let ctx = PlanContext {
            bucket: "b".to_owned(),
            key: "k.mp3".to_owned(),
            file_size,
            total_duration: 600.0,
        };
        let plans = planner
            .plan(ChunkingMode::SilenceAware, &ctx, None)
            .expect("planning succeeds");

        assert_eq!(plans.len(), 1);
        assert!((plans[0].end_seconds - 600.0).abs() < 1e-9);
    }

    #[test]
    fn greedy_planner_cleans_window_temp_files() {
        let file_size = 7200u64 * 16_000;
        let store = HeaderStore { file_size };
        let analyzer = ScriptedAnalyzer {
            silences: vec![],
            bytes_per_second: 16_000,
        };
        let dir = tempfile::tempdir().expect("tempdir");
        let planner = planner_fixture(&store, &analyzer, dir.path());

        let ctx = PlanContext {
            bucket: "b".to_owned(),
            key: "k.mp3".to_owned(),
            file_size,
            total_duration: 7200.0,
        };
        planner
            .plan(ChunkingMode::SilenceAware, &ctx, None)
            .expect("planning succeeds");

        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).expect("read_dir").collect();
        assert!(leftovers.is_empty(), "planner left temp files: {leftovers:?}");
    }

    #[test]
    fn greedy_planner_observes_cancellation() {
        let file_size = 28_800u64 * 16_000;
        let store = HeaderStore { file_size };
        let analyzer = ScriptedAnalyzer {
            silences: vec![],
            bytes_per_second: 16_000,
        };
        let dir = tempfile::tempdir().expect("tempdir");
        let planner = planner_fixture(&store, &analyzer, dir.path());
        let token = CancelToken::new();
        token.cancel();

        let ctx = PlanContext {
            bucket: "b".to_owned(),
            key: "k.mp3".to_owned(),
            file_size,
            total_duration: 28_800.0,
        };
        let err = planner
            .plan(ChunkingMode::SilenceAware, &ctx, Some(&token))
            .expect_err("should cancel");
        assert!(matches!(err, ScribeError::Cancelled(_)));
    }
}
