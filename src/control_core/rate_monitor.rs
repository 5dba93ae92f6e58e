//! rate_monitor.rs
//! Fixed-capacity ring of `(timestamp, temperature)` samples and the observed
//! heating/cooling rate over a trailing window.

use std::collections::VecDeque;

use statrs::statistics::Statistics;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateSample {
    pub timestamp: f64,
    pub temperature: f64,
}

#[derive(Debug, Clone)]
pub struct RateMonitor {
    samples: VecDeque<RateSample>,
    capacity: usize,
    window_s: f64,
}

impl RateMonitor {
    pub fn new(capacity: usize, window_s: f64) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            window_s,
        }
    }

    /// Append a sample; the oldest one is dropped at capacity.
    pub fn record(&mut self, timestamp: f64, temperature: f64) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(RateSample { timestamp, temperature });
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<RateSample> {
        self.samples.back().copied()
    }

    /// Least-squares slope over the trailing window, in degrees per hour.
    ///
    /// Uses whatever is available when the history is shorter than the window.
    /// `None` until two samples spanning a non-zero interval exist.
    pub fn rate_per_hour(&self) -> Option<f64> {
        let newest = self.samples.back()?.timestamp;
        let cutoff = newest - self.window_s;

        let (times, temps): (Vec<f64>, Vec<f64>) = self
            .samples
            .iter()
            .filter(|s| s.timestamp >= cutoff)
            .map(|s| (s.timestamp - newest, s.temperature))
            .unzip();

        if times.len() < 2 {
            return None;
        }

        let var_t = times.iter().variance();
        if !(var_t.is_finite() && var_t > 0.0) {
            return None;
        }
        let cov = times.iter().covariance(temps.iter());
        Some(cov / var_t * 3_600.0)
    }
}
