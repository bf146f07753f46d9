//! Rolling percentile estimate of LED response latency.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning of [`AdaptiveTimeout`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimeoutParams {
    /// Samples required before the estimate leaves its default.
    pub sample_size_min: usize,
    /// Rolling window length.
    pub sample_size_max: usize,
    /// Estimate used until `sample_size_min` samples were seen (seconds).
    pub default_timeout_sec: f64,
    /// Percentile of the window, in `[0, 100]`.
    pub percentile: f64,
    pub multiplier: f64,
}

impl Default for TimeoutParams {
    fn default() -> Self {
        Self {
            sample_size_min: 10,
            sample_size_max: 20,
            default_timeout_sec: 1.0,
            percentile: 90.0,
            multiplier: 1.5,
        }
    }
}

/// Self-tuning response timeout.
///
/// Keeps the last `sample_size_max` observed durations and, once at least
/// `sample_size_min` are present, estimates `percentile(window) * multiplier`.
/// A slow backend therefore gets a long timeout while a fast one is not held
/// to a fixed worst case.
#[derive(Clone, Debug)]
pub struct AdaptiveTimeout {
    params: TimeoutParams,
    samples: VecDeque<f64>,
    estimate: f64,
}

impl Default for AdaptiveTimeout {
    fn default() -> Self {
        Self::new(TimeoutParams::default())
    }
}

impl AdaptiveTimeout {
    pub fn new(params: TimeoutParams) -> Self {
        Self {
            estimate: params.default_timeout_sec,
            samples: VecDeque::with_capacity(params.sample_size_max + 1),
            params,
        }
    }

    pub fn params(&self) -> &TimeoutParams {
        &self.params
    }

    /// Current estimate in seconds.
    pub fn estimate_secs(&self) -> f64 {
        self.estimate
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.estimate.max(0.0))
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn add_sample(&mut self, duration: Duration) {
        self.add_sample_secs(duration.as_secs_f64());
    }

    pub fn add_sample_secs(&mut self, seconds: f64) {
        self.samples.push_back(seconds);
        while self.samples.len() > self.params.sample_size_max {
            self.samples.pop_front();
        }
        self.recompute();
    }

    fn recompute(&mut self) {
        if self.samples.len() < self.params.sample_size_min {
            return;
        }
        let window: Vec<f64> = self.samples.iter().copied().collect();
        if let Some(p) = percentile(&window, self.params.percentile) {
            self.estimate = p * self.params.multiplier;
        }
    }
}

/// Percentile with linear interpolation between closest ranks.
pub fn percentile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = (q.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}
