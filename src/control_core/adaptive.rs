//! adaptive.rs
//! Adaptive ramp-rate control for the active `Ramp` step.
//!
//! Per tick:
//! 1. record `(now, temp)` into the rate monitor every recording interval,
//! 2. measure the actual rate over the trailing window,
//! 3. when the step is old enough, far enough behind schedule and clearly slower than
//!    its target rate, lower the target rate to `reduction × actual`,
//! 4. fail the run if that lands below the step's `min_rate`.
//!
//! Steps without `min_rate` never adapt.

use log::{info, warn};

use crate::config::AdaptationConfig;
use crate::control_core::rate_monitor::RateMonitor;
use crate::error::{KilnError, Result};

/// Linear trajectory of a ramp, re-anchored whenever its rate changes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RampSegment {
    anchor_time: f64,
    anchor_temp: f64,
    /// Degrees per hour, always positive. `None` = full power, setpoint jumps to target.
    rate: Option<f64>,
    direction: f64,
    target_temp: f64,
}

impl RampSegment {
    pub fn new(now: f64, start_temp: f64, target_temp: f64, rate: Option<f64>) -> Self {
        let direction = if target_temp >= start_temp { 1.0 } else { -1.0 };
        Self {
            anchor_time: now,
            anchor_temp: start_temp,
            rate,
            direction,
            target_temp,
        }
    }

    /// Instantaneous setpoint, never past the target.
    pub fn setpoint(&self, now: f64) -> f64 {
        let Some(rate) = self.rate else {
            return self.target_temp;
        };
        let elapsed = (now - self.anchor_time).max(0.0);
        let raw = self.anchor_temp + self.direction * rate * elapsed / 3_600.0;
        if self.is_heating() {
            raw.min(self.target_temp)
        } else {
            raw.max(self.target_temp)
        }
    }

    pub fn is_heating(&self) -> bool {
        self.direction > 0.0
    }

    pub fn rate(&self) -> Option<f64> {
        self.rate
    }

    pub fn target_temp(&self) -> f64 {
        self.target_temp
    }

    /// Continue from `(now, temp)` at `rate`.
    pub fn reanchor(&mut self, now: f64, temp: f64, rate: f64) {
        self.anchor_time = now;
        self.anchor_temp = temp;
        self.rate = Some(rate);
    }
}

/// Live adaptation bookkeeping for one ramp step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptationState {
    pub current_target_rate: f64,
    pub adaptation_count: u32,
    pub last_adaptation_time: Option<f64>,
}

/// Emitted once per adaptation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateAdaptation {
    pub previous_rate: f64,
    pub new_rate: f64,
    pub actual_rate: f64,
    pub adaptation_count: u32,
}

#[derive(Debug, Clone)]
pub struct AdaptiveRateController {
    config: AdaptationConfig,
    monitor: RateMonitor,
    step_started_at: f64,
    last_recorded_at: Option<f64>,
    min_rate: Option<f64>,
    state: Option<AdaptationState>,
    actual_rate: Option<f64>,
}

impl AdaptiveRateController {
    pub fn new(config: AdaptationConfig) -> Self {
        let monitor = RateMonitor::new(config.monitor_capacity, config.measurement_window_s);
        Self {
            config,
            monitor,
            step_started_at: 0.0,
            last_recorded_at: None,
            min_rate: None,
            state: None,
            actual_rate: None,
        }
    }

    /// A ramp (or hold) became active; the monitor always starts fresh.
    pub fn begin_step(&mut self, now: f64, temp: f64, desired_rate: Option<f64>, min_rate: Option<f64>) {
        self.monitor.reset();
        self.step_started_at = now;
        self.actual_rate = None;
        self.min_rate = min_rate;
        self.state = desired_rate.map(|rate| AdaptationState {
            current_target_rate: rate,
            adaptation_count: 0,
            last_adaptation_time: None,
        });
        self.monitor.record(now, temp);
        self.last_recorded_at = Some(now);
    }

    pub fn end_step(&mut self) {
        self.state = None;
        self.min_rate = None;
        self.actual_rate = None;
        self.last_recorded_at = None;
        self.monitor.reset();
    }

    pub fn state(&self) -> Option<&AdaptationState> {
        self.state.as_ref()
    }

    pub fn actual_rate(&self) -> Option<f64> {
        self.actual_rate
    }

    pub fn monitor(&self) -> &RateMonitor {
        &self.monitor
    }

    /// Drive one tick. Returns the adaptation performed this tick, if any.
    pub fn update(&mut self, now: f64, temp: f64, segment: &mut RampSegment) -> Result<Option<RateAdaptation>> {
        let due = self
            .last_recorded_at
            .is_none_or(|t| now - t >= self.config.recording_interval_s);
        if due {
            self.monitor.record(now, temp);
            self.last_recorded_at = Some(now);
            self.actual_rate = self.monitor.rate_per_hour();
        }

        let Some(min_rate) = self.min_rate else {
            return Ok(None);
        };
        if !segment.is_heating() {
            return Ok(None);
        }
        let Some(state) = self.state.as_mut() else {
            return Ok(None);
        };

        let step_elapsed = now - self.step_started_at;
        if step_elapsed < self.config.min_step_time_s {
            return Ok(None);
        }
        if let Some(last) = state.last_adaptation_time {
            if now - last < self.config.min_time_between_s {
                return Ok(None);
            }
        }

        let expected = segment.setpoint(now);
        if (expected - temp).abs() <= self.config.temp_error_threshold {
            return Ok(None);
        }

        let Some(actual) = self.actual_rate else {
            return Ok(None);
        };
        if actual >= self.config.rate_threshold * state.current_target_rate {
            return Ok(None);
        }

        let new_rate = self.config.reduction_factor * actual;
        if new_rate < min_rate {
            warn!(
                "[Adaptive] cannot sustain min rate: actual {:.1}°C/h → {:.1}°C/h < min {:.1}°C/h",
                actual, new_rate, min_rate
            );
            return Err(KilnError::AdaptationExhausted {
                measured: actual,
                proposed: new_rate,
                required: min_rate,
                elapsed_s: step_elapsed,
            });
        }

        let previous_rate = state.current_target_rate;
        state.current_target_rate = new_rate;
        state.adaptation_count += 1;
        state.last_adaptation_time = Some(now);
        segment.reanchor(now, temp, new_rate);

        info!(
            "[Adaptive] rate {:.1} → {:.1}°C/h (actual {:.1}°C/h, adaptation #{})",
            previous_rate, new_rate, actual, state.adaptation_count
        );

        Ok(Some(RateAdaptation {
            previous_rate,
            new_rate,
            actual_rate: actual,
            adaptation_count: state.adaptation_count,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn controller() -> AdaptiveRateController {
        AdaptiveRateController::new(AdaptationConfig::default())
    }

    /// Feed a plant that heats at `plant_rate(target_rate)` °C/h until `until` seconds.
    fn drive(
        ctl: &mut AdaptiveRateController,
        segment: &mut RampSegment,
        start_temp: f64,
        until: u32,
        plant_rate: impl Fn(f64) -> f64,
    ) -> (Vec<RateAdaptation>, Option<KilnError>) {
        let mut temp = start_temp;
        let mut adaptations = Vec::new();
        for t in 0..=until {
            let now = t as f64;
            match ctl.update(now, temp, segment) {
                Ok(Some(a)) => adaptations.push(a),
                Ok(None) => {}
                Err(e) => return (adaptations, Some(e)),
            }
            let target_rate = ctl.state().map(|s| s.current_target_rate).unwrap_or(0.0);
            temp += plant_rate(target_rate) / 3_600.0;
        }
        (adaptations, None)
    }

    #[test]
    fn segment_setpoint_is_linear_and_clamped() {
        let seg = RampSegment::new(0.0, 20.0, 100.0, Some(80.0));
        assert_relative_eq!(seg.setpoint(0.0), 20.0);
        assert_relative_eq!(seg.setpoint(1_800.0), 60.0);
        assert_relative_eq!(seg.setpoint(7_200.0), 100.0);

        let cooling = RampSegment::new(0.0, 900.0, 500.0, Some(200.0));
        assert_relative_eq!(cooling.setpoint(3_600.0), 700.0);
        assert_relative_eq!(cooling.setpoint(36_000.0), 500.0);

        let full = RampSegment::new(0.0, 20.0, 600.0, None);
        assert_relative_eq!(full.setpoint(0.0), 600.0);
    }

    #[test]
    fn exhaustion_when_reduced_rate_below_min() {
        let mut ctl = controller();
        let mut seg = RampSegment::new(0.0, 100.0, 600.0, Some(100.0));
        ctl.begin_step(0.0, 100.0, Some(100.0), Some(80.0));

        let (adaptations, err) = drive(&mut ctl, &mut seg, 100.0, 6_000, |_| 70.0);
        assert!(adaptations.is_empty());
        match err {
            Some(KilnError::AdaptationExhausted { measured, proposed, required, elapsed_s }) => {
                assert_relative_eq!(measured, 70.0, epsilon = 0.5);
                assert_relative_eq!(proposed, 63.0, epsilon = 0.5);
                assert_relative_eq!(required, 80.0);
                // 30°C/h behind schedule crosses the 20°C error after 2400 s
                assert!(elapsed_s > 2_400.0 && elapsed_s < 2_500.0, "elapsed {}", elapsed_s);
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[test]
    fn successive_adaptations_strictly_decrease() {
        let mut ctl = controller();
        let mut seg = RampSegment::new(0.0, 100.0, 1_200.0, Some(100.0));
        ctl.begin_step(0.0, 100.0, Some(100.0), Some(20.0));

        // Plant always reaches only 70 % of whatever is asked of it
        let (adaptations, err) = drive(&mut ctl, &mut seg, 100.0, 200_000, |target| 0.7 * target);

        assert!(adaptations.len() >= 3, "only {} adaptations", adaptations.len());
        for pair in adaptations.windows(2) {
            assert!(pair[1].new_rate < pair[0].new_rate);
        }
        for (i, a) in adaptations.iter().enumerate() {
            assert_eq!(a.adaptation_count, i as u32 + 1);
            assert!(a.new_rate >= 20.0);
        }
        assert!(matches!(err, Some(KilnError::AdaptationExhausted { .. })));
    }

    #[test]
    fn no_min_rate_never_adapts() {
        let mut ctl = controller();
        let mut seg = RampSegment::new(0.0, 100.0, 600.0, Some(100.0));
        ctl.begin_step(0.0, 100.0, Some(100.0), None);
        let (adaptations, err) = drive(&mut ctl, &mut seg, 100.0, 10_000, |_| 10.0);
        assert!(adaptations.is_empty());
        assert!(err.is_none());
        assert_relative_eq!(ctl.actual_rate().unwrap(), 10.0, epsilon = 0.1);
    }

    #[test]
    fn on_schedule_ramp_does_not_adapt() {
        let mut ctl = controller();
        let mut seg = RampSegment::new(0.0, 100.0, 600.0, Some(100.0));
        ctl.begin_step(0.0, 100.0, Some(100.0), Some(80.0));
        let (adaptations, err) = drive(&mut ctl, &mut seg, 100.0, 10_000, |_| 98.0);
        assert!(adaptations.is_empty());
        assert!(err.is_none());
    }

    #[test]
    fn cooling_ramp_never_adapts() {
        let mut ctl = controller();
        let mut seg = RampSegment::new(0.0, 900.0, 500.0, Some(200.0));
        ctl.begin_step(0.0, 900.0, Some(200.0), Some(150.0));
        let (adaptations, err) = drive(&mut ctl, &mut seg, 900.0, 7_200, |_| -50.0);
        assert!(adaptations.is_empty());
        assert!(err.is_none());
    }
}
