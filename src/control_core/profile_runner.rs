//! profile_runner.rs
//! Executes a `Profile` step by step: `NotStarted → step 0 → … → step N−1 → Completed`.
//!
//! - **Ramp:** setpoint follows an anchored linear segment at the (possibly adapted) rate;
//!   the step completes once the measured temperature is within `ramp_tolerance` of the target.
//! - **Hold:** constant setpoint; completes after `duration_seconds` in the step.
//!
//! Safety checks live in `SafetyMonitor`; this module only decides setpoints and transitions.

use log::info;

use crate::config::AdaptationConfig;
use crate::control_core::adaptive::{AdaptiveRateController, RampSegment, RateAdaptation};
use crate::control_core::profile::{Profile, ProfileStep};
use crate::error::{KilnError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    NotStarted,
    Active { step_index: usize },
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RunEvent {
    Continue,
    Adapted(RateAdaptation),
    StepAdvanced { from: usize, to: usize },
    Completed,
}

#[derive(Debug, Clone)]
pub struct ProfileRunner {
    profile: Profile,
    adaptive: AdaptiveRateController,
    ramp_tolerance: f64,
    phase: RunPhase,
    /// Logical time the run (not the step) started, shifted back on resume
    run_started_at: f64,
    step_started_at: f64,
    step_start_temp: f64,
    segment: Option<RampSegment>,
}

impl ProfileRunner {
    pub fn new(profile: Profile, adaptation: AdaptationConfig, ramp_tolerance: f64) -> Self {
        Self {
            profile,
            adaptive: AdaptiveRateController::new(adaptation),
            ramp_tolerance,
            phase: RunPhase::NotStarted,
            run_started_at: 0.0,
            step_started_at: 0.0,
            step_start_temp: 0.0,
            segment: None,
        }
    }

    pub fn start(&mut self, now: f64, temp: f64) {
        self.run_started_at = now;
        info!(
            "[Profile] starting '{}' ({} steps) at {:.1}°C",
            self.profile.name,
            self.profile.total_steps(),
            temp
        );
        self.enter_step(0, now, temp, None);
    }

    /// Continue an interrupted run at `step_index`.
    ///
    /// Ramps restart from the measured temperature at `rate` (or the step's own rate);
    /// holds restart their full duration. `elapsed_offset` keeps the run clock continuous.
    pub fn resume(&mut self, step_index: usize, rate: Option<f64>, elapsed_offset: f64, now: f64, temp: f64) -> Result<()> {
        if step_index >= self.profile.total_steps() {
            return Err(KilnError::ConfigInvalid(format!(
                "cannot resume '{}' at step {} of {}",
                self.profile.name,
                step_index,
                self.profile.total_steps()
            )));
        }
        self.run_started_at = now - elapsed_offset.max(0.0);
        info!(
            "[Profile] resuming '{}' at step {} ({:.0}s into the run) from {:.1}°C",
            self.profile.name, step_index, elapsed_offset, temp
        );
        self.enter_step(step_index, now, temp, rate);
        Ok(())
    }

    fn enter_step(&mut self, index: usize, now: f64, temp: f64, rate_override: Option<f64>) {
        self.phase = RunPhase::Active { step_index: index };
        self.step_started_at = now;
        self.step_start_temp = temp;

        match self.profile.steps[index] {
            ProfileStep::Ramp { target_temp, desired_rate, min_rate } => {
                let rate = rate_override.filter(|r| r.is_finite() && *r > 0.0).or(desired_rate);
                self.segment = Some(RampSegment::new(now, temp, target_temp, rate));
                self.adaptive.begin_step(now, temp, rate, min_rate);
            }
            ProfileStep::Hold { .. } => {
                self.segment = None;
                self.adaptive.end_step();
            }
        }
        info!("[Profile] step {}: {}", index, self.profile.steps[index].describe());
    }

    /// Drive one tick: adaptation, then completion of the active step.
    pub fn advance(&mut self, now: f64, temp: f64) -> Result<RunEvent> {
        let RunPhase::Active { step_index } = self.phase else {
            return Ok(match self.phase {
                RunPhase::Completed => RunEvent::Completed,
                _ => RunEvent::Continue,
            });
        };

        let mut event = RunEvent::Continue;
        let step_done = match self.profile.steps[step_index] {
            ProfileStep::Ramp { target_temp, .. } => {
                let Some(segment) = self.segment.as_mut() else {
                    return Err(KilnError::ConfigInvalid(format!("ramp step {} lost its trajectory", step_index)));
                };
                if let Some(adaptation) = self.adaptive.update(now, temp, segment)? {
                    event = RunEvent::Adapted(adaptation);
                }
                if segment.is_heating() {
                    temp >= target_temp - self.ramp_tolerance
                } else {
                    temp <= target_temp + self.ramp_tolerance
                }
            }
            ProfileStep::Hold { duration_seconds, .. } => now - self.step_started_at >= duration_seconds,
        };

        if !step_done {
            return Ok(event);
        }

        let next = step_index + 1;
        if next < self.profile.total_steps() {
            self.enter_step(next, now, temp, None);
            Ok(RunEvent::StepAdvanced { from: step_index, to: next })
        } else {
            self.phase = RunPhase::Completed;
            self.segment = None;
            self.adaptive.end_step();
            info!(
                "[Profile] '{}' completed after {:.0}s",
                self.profile.name,
                now - self.run_started_at
            );
            Ok(RunEvent::Completed)
        }
    }

    /// Setpoint for the active step; `None` before start and after completion.
    pub fn target_temp(&self, now: f64) -> Option<f64> {
        let step = self.current_step()?;
        match step {
            ProfileStep::Ramp { target_temp, .. } => {
                Some(self.segment.map(|s| s.setpoint(now)).unwrap_or(*target_temp))
            }
            ProfileStep::Hold { target_temp, .. } => Some(*target_temp),
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn is_started(&self) -> bool {
        self.phase != RunPhase::NotStarted
    }

    pub fn is_completed(&self) -> bool {
        self.phase == RunPhase::Completed
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn step_index(&self) -> Option<usize> {
        match self.phase {
            RunPhase::Active { step_index } => Some(step_index),
            _ => None,
        }
    }

    pub fn current_step(&self) -> Option<&ProfileStep> {
        self.step_index().map(|i| &self.profile.steps[i])
    }

    pub fn step_name(&self) -> String {
        self.current_step().map(ProfileStep::describe).unwrap_or_default()
    }

    pub fn elapsed(&self, now: f64) -> f64 {
        match self.phase {
            RunPhase::NotStarted => 0.0,
            _ => (now - self.run_started_at).max(0.0),
        }
    }

    pub fn desired_rate(&self) -> Option<f64> {
        match self.current_step()? {
            ProfileStep::Ramp { desired_rate, .. } => *desired_rate,
            ProfileStep::Hold { .. } => None,
        }
    }

    /// Live (possibly adapted) target rate of the active ramp.
    pub fn current_rate(&self) -> Option<f64> {
        self.segment.and_then(|s| s.rate())
    }

    pub fn actual_rate(&self) -> Option<f64> {
        self.adaptive.actual_rate()
    }

    pub fn adaptation_count(&self) -> u32 {
        self.adaptive.state().map(|s| s.adaptation_count).unwrap_or(0)
    }

    /// `(step_index + step_fraction) / total_steps · 100`
    pub fn progress_percent(&self, now: f64, temp: f64) -> f64 {
        let total = self.profile.total_steps().max(1) as f64;
        match self.phase {
            RunPhase::NotStarted => 0.0,
            RunPhase::Completed => 100.0,
            RunPhase::Active { step_index } => {
                let fraction = match self.profile.steps[step_index] {
                    ProfileStep::Ramp { target_temp, .. } => {
                        let span = target_temp - self.step_start_temp;
                        if span.abs() < f64::EPSILON {
                            1.0
                        } else {
                            ((temp - self.step_start_temp) / span).clamp(0.0, 1.0)
                        }
                    }
                    ProfileStep::Hold { duration_seconds, .. } => {
                        ((now - self.step_started_at) / duration_seconds).clamp(0.0, 1.0)
                    }
                };
                (step_index as f64 + fraction) / total * 100.0
            }
        }
    }
}
