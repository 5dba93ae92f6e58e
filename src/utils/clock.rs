//! clock.rs
//! Time sources for the control core.
//!
//! `now()` is logical, monotonic seconds used for every control computation.
//! `epoch()` is wall-clock seconds for schedules, status timestamps and log rows.
//! With `time_scale > 1` logical time runs faster than the wall clock so that a
//! simulated firing completes in minutes.

use std::{
    sync::Arc,
    time::{Instant, SystemTime, UNIX_EPOCH},
};

use parking_lot::Mutex;

pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
    fn epoch(&self) -> f64;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> f64 {
        (**self).now()
    }

    fn epoch(&self) -> f64 {
        (**self).epoch()
    }
}

pub fn epoch_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Wall clock, optionally accelerated.
#[derive(Debug, Clone)]
pub struct ScaledClock {
    origin: Instant,
    origin_epoch: f64,
    scale: f64,
}

impl ScaledClock {
    pub fn new(scale: f64) -> Self {
        Self {
            origin: Instant::now(),
            origin_epoch: epoch_now(),
            scale: if scale.is_finite() && scale > 0.0 { scale } else { 1.0 },
        }
    }

    pub fn real_time() -> Self {
        Self::new(1.0)
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }
}

impl Clock for ScaledClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * self.scale
    }

    /// Accelerated alongside `now()`, so schedules fire on logical time.
    fn epoch(&self) -> f64 {
        self.origin_epoch + self.now()
    }
}

/// Hand-advanced clock for tests and offline replays.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<f64>,
    origin_epoch: f64,
}

impl ManualClock {
    pub fn new(origin_epoch: f64) -> Self {
        Self {
            now: Mutex::new(0.0),
            origin_epoch,
        }
    }

    pub fn advance(&self, seconds: f64) {
        *self.now.lock() += seconds;
    }

    pub fn set(&self, now: f64) {
        *self.now.lock() = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock()
    }

    fn epoch(&self) -> f64 {
        self.origin_epoch + self.now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_both_scales() {
        let clock = Arc::new(ManualClock::new(1_700_000_000.0));
        clock.advance(12.5);
        assert_eq!(clock.now(), 12.5);
        assert_eq!(clock.epoch(), 1_700_000_012.5);
        clock.set(3.0);
        assert_eq!(clock.now(), 3.0);
    }

    #[test]
    fn scaled_clock_rejects_bad_scale() {
        assert_eq!(ScaledClock::new(0.0).scale(), 1.0);
        assert_eq!(ScaledClock::new(f64::NAN).scale(), 1.0);
        assert_eq!(ScaledClock::new(60.0).scale(), 60.0);
        let c = ScaledClock::real_time();
        assert!(c.now() >= 0.0);
        assert!(c.epoch() > 1_600_000_000.0);
    }
}
