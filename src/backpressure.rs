//! Memory backpressure for chunk processing.
//!
//! The executor asks the gate before fetching each chunk. The gate compares
//! resident process memory against total system memory and pauses new work
//! above the pause threshold. It only delays the next fetch; work already in
//! flight is never preempted, so this is a soft bound.

use std::sync::Mutex;
use std::time::Duration;

use sysinfo::System;

use crate::error::ScribeResult;
use crate::pipeline::CancelToken;

const WARNING_THRESHOLD: f64 = 0.75;
const CRITICAL_THRESHOLD: f64 = 0.85;
const PAUSE_THRESHOLD: f64 = 0.90;

/// One pause step while waiting for memory to drain.
const PAUSE_INTERVAL: Duration = Duration::from_secs(1);
/// Give up waiting after this many steps and proceed anyway.
const MAX_WAIT_ITERATIONS: u32 = 30;

/// A point-in-time memory reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemorySample {
    pub used_bytes: u64,
    pub max_bytes: u64,
}

impl MemorySample {
    #[must_use]
    pub fn ratio(&self) -> f64 {
        if self.max_bytes == 0 {
            0.0
        } else {
            self.used_bytes as f64 / self.max_bytes as f64
        }
    }
}

pub type MemorySampler = Box<dyn Fn() -> Option<MemorySample> + Send + Sync>;

/// Pauses chunk fetches while resident memory is near its limit.
pub struct BackpressureGate {
    sampler: MemorySampler,
    pause_interval: Duration,
}

impl BackpressureGate {
    /// Gate backed by real process/system memory readings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sampler: sysinfo_sampler(),
            pause_interval: PAUSE_INTERVAL,
        }
    }

    /// Gate with an injected sampler (tests, alternative probes).
    #[must_use]
    pub fn with_sampler(sampler: MemorySampler) -> Self {
        Self {
            sampler,
            pause_interval: PAUSE_INTERVAL,
        }
    }

    /// Shorten the pause step; tests use this to avoid real sleeps.
    #[must_use]
    pub fn with_pause_interval(mut self, interval: Duration) -> Self {
        self.pause_interval = interval;
        self
    }

    /// Current used/max ratio, `None` when sampling is unavailable.
    #[must_use]
    pub fn memory_ratio(&self) -> Option<f64> {
        (self.sampler)().map(|sample| sample.ratio())
    }

    /// True when processing should pause before starting more work.
    #[must_use]
    pub fn should_pause(&self) -> bool {
        let Some(ratio) = self.memory_ratio() else {
            // No reading available; never block on a blind gate.
            return false;
        };

        if ratio >= PAUSE_THRESHOLD {
            tracing::warn!(
                ratio = format!("{:.1}%", ratio * 100.0),
                "memory usage critical, pausing chunk processing"
            );
            return true;
        }

        if ratio >= CRITICAL_THRESHOLD {
            tracing::warn!(ratio = format!("{:.1}%", ratio * 100.0), "memory usage high");
        } else if ratio >= WARNING_THRESHOLD {
            tracing::info!(
                ratio = format!("{:.1}%", ratio * 100.0),
                "memory usage elevated"
            );
        }

        false
    }

    /// Block until memory pressure clears, one pause step at a time, up to
    /// [`MAX_WAIT_ITERATIONS`]. Proceeds anyway after the cap (logged) so a
    /// leak elsewhere cannot wedge the run. Cancellation is observed
    /// between steps.
    pub fn wait_if_needed(&self, token: Option<&CancelToken>) -> ScribeResult<()> {
        let mut attempts = 0u32;

        while self.should_pause() && attempts < MAX_WAIT_ITERATIONS {
            if let Some(tok) = token {
                tok.checkpoint()?;
            }
            tracing::info!(
                attempt = attempts + 1,
                max = MAX_WAIT_ITERATIONS,
                "waiting for memory pressure to decrease"
            );
            std::thread::sleep(self.pause_interval);
            attempts += 1;
        }

        if attempts >= MAX_WAIT_ITERATIONS {
            tracing::error!(
                waited_secs = MAX_WAIT_ITERATIONS,
                "memory pressure did not decrease, continuing anyway"
            );
        }

        Ok(())
    }

    /// Human-readable memory line for progress logs.
    #[must_use]
    pub fn memory_stats_line(&self) -> String {
        match (self.sampler)() {
            Some(sample) => format!(
                "memory[used={}MB, max={}MB, usage={:.1}%]",
                sample.used_bytes / 1024 / 1024,
                sample.max_bytes / 1024 / 1024,
                sample.ratio() * 100.0
            ),
            None => "memory[unavailable]".to_owned(),
        }
    }
}

impl Default for BackpressureGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Sampler reading resident memory of this process against total system
/// memory.
fn sysinfo_sampler() -> MemorySampler {
    let system = Mutex::new(System::new());
    Box::new(move || {
        let pid = sysinfo::get_current_pid().ok()?;
        let mut system = system.lock().ok()?;
        system.refresh_memory();
        system.refresh_processes();
        let max_bytes = system.total_memory();
        let used_bytes = system.process(pid)?.memory();
        Some(MemorySample {
            used_bytes,
            max_bytes,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    fn fixed_gate(ratio: f64) -> BackpressureGate {
        BackpressureGate::with_sampler(Box::new(move || {
            Some(MemorySample {
                used_bytes: (ratio * 1000.0) as u64,
                max_bytes: 1000,
            })
        }))
        .with_pause_interval(Duration::from_millis(1))
    }

    #[test]
    fn ratio_of_zero_max_is_zero() {
        let sample = MemorySample {
            used_bytes: 100,
            max_bytes: 0,
        };
        assert!((sample.ratio() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn below_warning_does_not_pause() {
        assert!(!fixed_gate(0.50).should_pause());
    }

    #[test]
    fn warning_band_does_not_pause() {
        assert!(!fixed_gate(0.80).should_pause());
    }

    #[test]
    fn critical_band_does_not_pause() {
        assert!(!fixed_gate(0.87).should_pause());
    }

    #[test]
    fn at_pause_threshold_pauses() {
        assert!(fixed_gate(0.90).should_pause());
        assert!(fixed_gate(0.99).should_pause());
    }

    #[test]
    fn unavailable_sampler_never_pauses() {
        let gate = BackpressureGate::with_sampler(Box::new(|| None));
        assert!(!gate.should_pause());
        assert_eq!(gate.memory_ratio(), None);
        assert_eq!(gate.memory_stats_line(), "memory[unavailable]");
    }

    #[test]
    fn wait_returns_immediately_when_memory_is_fine() {
        let gate = fixed_gate(0.10);
        let start = std::time::Instant::now();
        gate.wait_if_needed(None).expect("no cancellation");
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn wait_gives_up_after_max_iterations() {
        let gate = fixed_gate(0.95);
        gate.wait_if_needed(None).expect("proceeds after cap");
    }

    #[test]
    fn wait_resumes_once_pressure_drops() {
        let polls = Arc::new(AtomicU64::new(0));
        let polls_in_sampler = Arc::clone(&polls);
        let gate = BackpressureGate::with_sampler(Box::new(move || {
            let count = polls_in_sampler.fetch_add(1, Ordering::SeqCst);
            let ratio = if count < 3 { 0.95 } else { 0.40 };
            Some(MemorySample {
                used_bytes: (ratio * 1000.0) as u64,
                max_bytes: 1000,
            })
        }))
        .with_pause_interval(Duration::from_millis(1));

        gate.wait_if_needed(None).expect("no cancellation");
        assert!(polls.load(Ordering::SeqCst) >= 4, "should re-poll after sleeping");
    }

    #[test]
    fn wait_observes_cancellation() {
        let gate = fixed_gate(0.95);
        let token = CancelToken::new();
        token.cancel();
        let err = gate
            .wait_if_needed(Some(&token))
            .expect_err("should cancel");
        assert!(matches!(err, crate::error::ScribeError::Cancelled(_)));
    }

    #[test]
    fn stats_line_formats_megabytes() {
        let gate = BackpressureGate::with_sampler(Box::new(|| {
            Some(MemorySample {
                used_bytes: 512 * 1024 * 1024,
                max_bytes: 1024 * 1024 * 1024,
            })
        }));
        let line = gate.memory_stats_line();
        assert!(line.contains("used=512MB"), "got: {line}");
        assert!(line.contains("50.0%"), "got: {line}");
    }

    #[test]
    fn sysinfo_sampler_produces_plausible_reading() {
        let sampler = sysinfo_sampler();
        if let Some(sample) = sampler() {
            assert!(sample.max_bytes > 0);
            assert!(sample.used_bytes > 0);
            assert!(sample.ratio() > 0.0 && sample.ratio() < 1.0);
        }
    }
}
