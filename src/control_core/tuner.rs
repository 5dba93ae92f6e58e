//! tuner.rs
//! Open-loop auto-tuning session.
//!
//! The tuner drives the heating output through a mode-specific phase script,
//! records every tick as a `TuningSample`, and hands the recording to
//! `thermal_fit` once the closing cooldown finishes.
//!
//! Phase endings:
//! - **Heat/Hold:** plateau (trailing window range below threshold) or phase timeout.
//! - **Cool:** back within the cooldown margin of the starting temperature, or cooldown timeout.
//! - Reaching the mode ceiling during any heating phase jumps straight to cooldown.

use std::{collections::VecDeque, fmt, str::FromStr};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::config::TuningConfig;
use crate::control_core::thermal_fit::{self, TuningResult};
use crate::error::{KilnError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TuningMode {
    Safe,
    Standard,
    Thorough,
    HighTemp,
}

impl TuningMode {
    /// Ceiling for the whole session.
    pub fn max_temp(self) -> f64 {
        match self {
            TuningMode::Safe => 100.0,
            TuningMode::Standard => 150.0,
            TuningMode::Thorough => 200.0,
            TuningMode::HighTemp => 300.0,
        }
    }

    /// Phase script, always ending in a single cooldown.
    pub fn plan(self) -> Vec<PhasePlan> {
        let (powers, with_holds): (&[f64], bool) = match self {
            TuningMode::Safe => (&[40.0], false),
            TuningMode::Standard => (&[25.0, 50.0, 75.0], false),
            TuningMode::Thorough => (&[20.0, 40.0, 60.0, 80.0], true),
            TuningMode::HighTemp => (&[30.0, 60.0, 90.0], true),
        };

        let mut plan = Vec::with_capacity(powers.len() * 2 + 1);
        for &power in powers {
            plan.push(PhasePlan { kind: PhaseKind::Heat, power });
            if with_holds {
                plan.push(PhasePlan { kind: PhaseKind::Hold, power });
            }
        }
        plan.push(PhasePlan { kind: PhaseKind::Cool, power: 0.0 });
        plan
    }

    pub fn name(self) -> &'static str {
        match self {
            TuningMode::Safe => "safe",
            TuningMode::Standard => "standard",
            TuningMode::Thorough => "thorough",
            TuningMode::HighTemp => "high_temp",
        }
    }
}

impl fmt::Display for TuningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TuningMode {
    type Err = KilnError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "safe" => Ok(TuningMode::Safe),
            "standard" => Ok(TuningMode::Standard),
            "thorough" => Ok(TuningMode::Thorough),
            "high_temp" | "hightemp" | "high" => Ok(TuningMode::HighTemp),
            other => Err(KilnError::ConfigInvalid(format!("unknown tuning mode '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    Heat,
    Hold,
    Cool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhasePlan {
    pub kind: PhaseKind,
    /// Fixed heating output, percent
    pub power: f64,
}

impl PhasePlan {
    /// Label used in status and log rows; `from_label` reads it back.
    pub fn label(&self) -> String {
        match self.kind {
            PhaseKind::Heat => format!("heat {:.0}%", self.power),
            PhaseKind::Hold => format!("hold {:.0}%", self.power),
            PhaseKind::Cool => "cooldown".to_string(),
        }
    }

    pub fn from_label(label: &str) -> Option<PhasePlan> {
        let label = label.trim();
        if label == "cooldown" {
            return Some(PhasePlan { kind: PhaseKind::Cool, power: 0.0 });
        }
        let (kind, rest) = label.split_once(' ')?;
        let power: f64 = rest.trim_end_matches('%').parse().ok()?;
        let kind = match kind {
            "heat" => PhaseKind::Heat,
            "hold" => PhaseKind::Hold,
            _ => return None,
        };
        Some(PhasePlan { kind, power })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TuningSample {
    pub elapsed: f64,
    pub temp: f64,
    pub ssr_percent: f64,
}

/// Summary of one finished phase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub plan: PhasePlan,
    pub start_elapsed: f64,
    pub end_elapsed: f64,
    pub start_temp: f64,
    pub end_temp: f64,
    /// Mean of the plateau window when the phase ended on a plateau
    pub plateau_temp: Option<f64>,
}

// ============================================================================
// Plateau detection
// ============================================================================

#[derive(Debug, Clone)]
pub struct PlateauDetector {
    window: usize,
    interval_s: f64,
    range: f64,
    readings: VecDeque<f64>,
    last_sample_at: Option<f64>,
}

impl PlateauDetector {
    pub fn new(window: usize, interval_s: f64, range: f64) -> Self {
        Self {
            window,
            interval_s,
            range,
            readings: VecDeque::with_capacity(window),
            last_sample_at: None,
        }
    }

    pub fn from_config(config: &TuningConfig) -> Self {
        Self::new(config.plateau_window, config.plateau_sample_interval_s, config.plateau_range)
    }

    /// Feed a reading; only one per sample interval is kept.
    pub fn observe(&mut self, now: f64, temp: f64) -> bool {
        let due = self.last_sample_at.is_none_or(|t| now - t >= self.interval_s);
        if due {
            if self.readings.len() >= self.window {
                self.readings.pop_front();
            }
            self.readings.push_back(temp);
            self.last_sample_at = Some(now);
        }
        self.is_plateau()
    }

    pub fn is_plateau(&self) -> bool {
        if self.readings.len() < self.window {
            return false;
        }
        let (lo, hi) = self
            .readings
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &t| (lo.min(t), hi.max(t)));
        hi - lo < self.range
    }

    pub fn mean(&self) -> Option<f64> {
        if self.readings.is_empty() {
            return None;
        }
        Some(self.readings.iter().mean())
    }

    pub fn reset(&mut self) {
        self.readings.clear();
        self.last_sample_at = None;
    }
}

// ============================================================================
// Session
// ============================================================================

#[derive(Debug, Clone)]
pub enum TunerStep {
    /// Apply this output (percent) for the coming tick
    Power(f64),
    Finished(Box<TuningResult>),
}

#[derive(Debug, Clone)]
pub struct AutoTuner {
    mode: TuningMode,
    config: TuningConfig,
    phases: Vec<PhasePlan>,
    phase_index: usize,
    started_at: Option<f64>,
    ambient_temp: f64,
    phase_started_at: f64,
    phase_start_temp: f64,
    plateau: PlateauDetector,
    samples: Vec<TuningSample>,
    records: Vec<PhaseRecord>,
}

impl AutoTuner {
    pub fn new(mode: TuningMode, config: TuningConfig) -> Self {
        let plateau = PlateauDetector::from_config(&config);
        Self {
            mode,
            config,
            phases: mode.plan(),
            phase_index: 0,
            started_at: None,
            ambient_temp: 0.0,
            phase_started_at: 0.0,
            phase_start_temp: 0.0,
            plateau,
            samples: Vec::new(),
            records: Vec::new(),
        }
    }

    pub fn mode(&self) -> TuningMode {
        self.mode
    }

    pub fn phase_index(&self) -> usize {
        self.phase_index
    }

    pub fn total_phases(&self) -> usize {
        self.phases.len()
    }

    pub fn current_phase(&self) -> Option<PhasePlan> {
        self.phases.get(self.phase_index).copied()
    }

    pub fn samples(&self) -> &[TuningSample] {
        &self.samples
    }

    pub fn records(&self) -> &[PhaseRecord] {
        &self.records
    }

    pub fn elapsed(&self, now: f64) -> f64 {
        self.started_at.map_or(0.0, |t| (now - t).max(0.0))
    }

    pub fn progress_percent(&self, now: f64) -> f64 {
        let Some(phase) = self.current_phase() else {
            return 100.0;
        };
        let budget = match phase.kind {
            PhaseKind::Cool => self.config.cooldown_timeout_s,
            _ => self.config.phase_timeout_s,
        };
        let fraction = ((now - self.phase_started_at) / budget).clamp(0.0, 1.0);
        (self.phase_index as f64 + fraction) / self.phases.len() as f64 * 100.0
    }

    /// Drive one tick. The first call anchors the session at `(now, temp)`.
    pub fn advance(&mut self, now: f64, temp: f64) -> Result<TunerStep> {
        let started_at = match self.started_at {
            Some(t) => t,
            None => {
                self.started_at = Some(now);
                self.ambient_temp = temp;
                self.open_phase(now, temp);
                info!(
                    "[Tuner] {} session from {:.1}°C, {} phases, ceiling {:.0}°C",
                    self.mode,
                    temp,
                    self.phases.len(),
                    self.mode.max_temp()
                );
                now
            }
        };
        let elapsed = now - started_at;

        let Some(phase) = self.current_phase() else {
            return Err(KilnError::TuningTimeout("session already finished".into()));
        };
        self.samples.push(TuningSample {
            elapsed,
            temp,
            ssr_percent: phase.power,
        });
        let phase_elapsed = now - self.phase_started_at;

        if phase.kind != PhaseKind::Cool && temp >= self.mode.max_temp() {
            warn!(
                "[Tuner] {:.1}°C reached the {} ceiling; cooling down",
                temp, self.mode
            );
            self.close_phase(elapsed, temp, None);
            self.phase_index = self.phases.len() - 1;
            self.open_phase(now, temp);
            return Ok(TunerStep::Power(0.0));
        }

        let finished = match phase.kind {
            PhaseKind::Heat | PhaseKind::Hold => {
                let plateau = self.plateau.observe(now, temp);
                if plateau || phase_elapsed >= self.config.phase_timeout_s {
                    let rise = temp - self.phase_start_temp;
                    if phase.kind == PhaseKind::Heat && rise < self.config.min_response_rise {
                        return Err(KilnError::TuningTimeout(format!(
                            "no response to {:.0}% output after {:.0}s (rise {:.1}°C)",
                            phase.power, phase_elapsed, rise
                        )));
                    }
                    let plateau_temp = if plateau { self.plateau.mean() } else { None };
                    Some(plateau_temp)
                } else {
                    None
                }
            }
            PhaseKind::Cool => {
                let cooled = temp <= self.ambient_temp + self.config.cooldown_margin;
                (cooled || phase_elapsed >= self.config.cooldown_timeout_s).then_some(None)
            }
        };

        let Some(plateau_temp) = finished else {
            return Ok(TunerStep::Power(phase.power));
        };

        self.close_phase(elapsed, temp, plateau_temp);
        self.phase_index += 1;
        match self.current_phase() {
            Some(next) => {
                self.open_phase(now, temp);
                Ok(TunerStep::Power(next.power))
            }
            None => {
                let result = thermal_fit::analyze(
                    self.mode,
                    &self.samples,
                    &self.records,
                    self.ambient_temp,
                    &self.config,
                )?;
                info!(
                    "[Tuner] finished after {:.0}s: {:?} quality ({:.0}%), recommending {:?}",
                    elapsed, result.quality.grade, result.quality.score, result.recommended_method
                );
                Ok(TunerStep::Finished(Box::new(result)))
            }
        }
    }

    fn open_phase(&mut self, now: f64, temp: f64) {
        self.phase_started_at = now;
        self.phase_start_temp = temp;
        self.plateau.reset();
        if let Some(phase) = self.current_phase() {
            info!("[Tuner] phase {}/{}: {}", self.phase_index + 1, self.phases.len(), phase.label());
        }
    }

    fn close_phase(&mut self, elapsed: f64, temp: f64, plateau_temp: Option<f64>) {
        let Some(plan) = self.current_phase() else {
            return;
        };
        let start_elapsed = self.phase_started_at - self.started_at.unwrap_or(self.phase_started_at);
        self.records.push(PhaseRecord {
            plan,
            start_elapsed,
            end_elapsed: elapsed,
            start_temp: self.phase_start_temp,
            end_temp: temp,
            plateau_temp,
        });
    }
}
