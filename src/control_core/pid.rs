//! pid.rs
//! PID control law producing a 0–100 % heating demand.
//!
//! - Integral accumulates `ki·e·dt` directly, so a gain change never rescales past error.
//! - Anti-windup: integration is frozen while the output is saturated and the error
//!   pushes further into saturation.
//! - Derivative on measurement: a setpoint step never kicks the output.

use serde::{Deserialize, Serialize};

use crate::control_core::gain_scheduler::Gains;

pub const OUTPUT_MIN: f64 = 0.0;
pub const OUTPUT_MAX: f64 = 100.0;

/// Per-tick contribution of each term, reported in the status snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PidTerms {
    pub p: f64,
    pub i: f64,
    pub d: f64,
}

#[derive(Debug, Clone)]
pub struct Pid {
    gains: Gains,
    integral: f64,
    previous_error: f64,
    previous_measured: Option<f64>,
    last_output: f64,
    last_terms: PidTerms,
}

impl Pid {
    pub fn new(gains: Gains) -> Self {
        Self {
            gains,
            integral: 0.0,
            previous_error: 0.0,
            previous_measured: None,
            last_output: 0.0,
            last_terms: PidTerms::default(),
        }
    }

    /// Overwrite gains. The integral accumulator is left untouched.
    pub fn set_gains(&mut self, gains: Gains) {
        self.gains = gains;
    }

    pub fn gains(&self) -> Gains {
        self.gains
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }

    pub fn previous_error(&self) -> f64 {
        self.previous_error
    }

    pub fn last_output(&self) -> f64 {
        self.last_output
    }

    pub fn terms(&self) -> PidTerms {
        self.last_terms
    }

    /// Clear dynamic state (new run, new tuning session). Gains are kept.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.previous_error = 0.0;
        self.previous_measured = None;
        self.last_output = 0.0;
        self.last_terms = PidTerms::default();
    }

    /// One control-law evaluation. Returns the clamped output in `[0, 100]`.
    ///
    /// A non-positive or non-finite `dt` leaves all state untouched and returns
    /// the previous output.
    pub fn update(&mut self, target: f64, measured: f64, dt: f64) -> f64 {
        if !(dt.is_finite() && dt > 0.0) || !target.is_finite() || !measured.is_finite() {
            return self.last_output;
        }

        let error = target - measured;
        let p = self.gains.kp * error;

        let d = match self.previous_measured {
            Some(prev) => self.gains.kd * (prev - measured) / dt,
            None => 0.0,
        };

        // Candidate integral; keep it only if it does not deepen saturation
        let candidate = (self.integral + self.gains.ki * error * dt).clamp(-OUTPUT_MAX, OUTPUT_MAX);
        let unclamped = p + candidate + d;
        let winding_up = (unclamped > OUTPUT_MAX && error > 0.0) || (unclamped < OUTPUT_MIN && error < 0.0);
        if !winding_up {
            self.integral = candidate;
        }

        let output = (p + self.integral + d).clamp(OUTPUT_MIN, OUTPUT_MAX);

        self.previous_error = error;
        self.previous_measured = Some(measured);
        self.last_output = output;
        self.last_terms = PidTerms { p, i: self.integral, d };
        output
    }
}
