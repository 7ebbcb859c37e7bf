//! ---
//! nf_section: "01-core-functionality"
//! nf_subsection: "module"
//! nf_type: "source"
//! nf_scope: "code"
//! nf_description: "Shared primitives and utilities for the core runtime."
//! nf_version: "v0.0.0-prealpha"
//! nf_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

const DEFAULT_SAMPLE_WINDOW: usize = 4096;

/// Rolling window of scheduling jitter samples in nanoseconds.
#[derive(Debug)]
pub struct JitterHistogram {
    samples: Mutex<VecDeque<f64>>,
    window: usize,
}

impl Default for JitterHistogram {
    fn default() -> Self {
        Self::with_window(DEFAULT_SAMPLE_WINDOW)
    }
}

impl JitterHistogram {
    /// Keep at most `window` samples; older ones are discarded first.
    pub fn with_window(window: usize) -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(window.min(DEFAULT_SAMPLE_WINDOW))),
            window: window.max(1),
        }
    }

    pub fn record(&self, jitter: Duration) {
        let nanos = jitter.as_secs_f64() * 1_000_000_000.0;
        let mut samples = self.samples.lock();
        if samples.len() == self.window {
            samples.pop_front();
        }
        samples.push_back(nanos);
    }

    pub fn summary(&self) -> Option<JitterSummary> {
        let samples = self.samples.lock();
        if samples.is_empty() {
            return None;
        }
        let count = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / count;
        let variance = if samples.len() > 1 {
            samples
                .iter()
                .map(|value| {
                    let delta = value - mean;
                    delta * delta
                })
                .sum::<f64>()
                / (count - 1.0)
        } else {
            0.0
        };
        Some(JitterSummary {
            mean_ns: mean,
            std_dev_ns: variance.sqrt(),
            max_ns: samples.iter().copied().fold(f64::MIN, f64::max),
            min_ns: samples.iter().copied().fold(f64::MAX, f64::min),
            samples: samples.len() as u64,
        })
    }

    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        if let Some(summary) = self.summary() {
            let mut file = File::create(path)?;
            let json = serde_json::to_vec_pretty(&summary)
                .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))?;
            file.write_all(&json)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JitterSummary {
    pub mean_ns: f64,
    pub std_dev_ns: f64,
    pub max_ns: f64,
    pub min_ns: f64,
    pub samples: u64,
}

/// Measures the spacing of consecutive ticks against the target period.
#[derive(Debug)]
pub struct LoopTimingReporter {
    target_interval: Duration,
    last_tick: Mutex<Option<Instant>>,
    histogram: JitterHistogram,
}

impl LoopTimingReporter {
    pub fn new(target_interval: Duration) -> Self {
        Self {
            target_interval,
            last_tick: Mutex::new(None),
            histogram: JitterHistogram::default(),
        }
    }

    /// Record a tick that fired at `now` and return the spacing since the
    /// previous one.
    pub fn record_tick_at(&self, now: Instant) -> Option<Duration> {
        let mut last_tick = self.last_tick.lock();
        let spacing = last_tick.map(|previous| now.saturating_duration_since(previous));
        if let Some(actual) = spacing {
            let jitter = if actual > self.target_interval {
                actual - self.target_interval
            } else {
                self.target_interval - actual
            };
            self.histogram.record(jitter);
        }
        *last_tick = Some(now);
        spacing
    }

    pub fn histogram(&self) -> &JitterHistogram {
        &self.histogram
    }
}
