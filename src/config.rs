//! config.rs
//! Immutable tunables for the whole controller, loaded once at startup.
//!
//! The Control Supervisor owns one `KilnConfig` and hands each component the
//! section it needs at construction time. Every empirically chosen constant
//! (plateau window, adaptation timing) lives here as a default.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::control_core::gain_scheduler::{GainScheduleConfig, GainScheduler, Gains};
use crate::error::{KilnError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KilnConfig {
    pub control: ControlConfig,
    pub pid: PidConfig,
    pub gain_schedule: GainScheduleConfig,
    pub adaptation: AdaptationConfig,
    pub safety: SafetyConfig,
    pub tuning: TuningConfig,
    pub link: LinkConfig,
    pub recovery: RecoveryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Logical control tick (1 Hz)
    pub tick_interval_ms: u64,
    /// Output switching slots per tick (10 Hz)
    pub output_slots_per_tick: u32,
    pub status_interval_ms: u64,
    pub control_core: usize,
    pub supervisor_core: usize,
    /// Logical seconds per wall-clock second. 1.0 on real hardware.
    pub time_scale: f64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            output_slots_per_tick: 10,
            status_interval_ms: 500,
            control_core: 1,
            supervisor_core: 0,
            time_scale: 1.0,
        }
    }
}

impl ControlConfig {
    pub fn tick_interval_s(&self) -> f64 {
        self.tick_interval_ms as f64 / 1_000.0
    }
}

/// Base gains; the gain scheduler scales or replaces them per temperature.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PidConfig {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            kp: 6.11,
            ki: 0.0132,
            kd: 29.5,
        }
    }
}

impl PidConfig {
    pub fn gains(&self) -> Gains {
        Gains::new(self.kp, self.ki, self.kd)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptationConfig {
    pub recording_interval_s: f64,
    pub measurement_window_s: f64,
    pub monitor_capacity: usize,
    pub min_step_time_s: f64,
    pub min_time_between_s: f64,
    pub temp_error_threshold: f64,
    /// Adapt when actual rate < threshold × target rate
    pub rate_threshold: f64,
    pub reduction_factor: f64,
    /// Derived min_rate for converted legacy profiles
    pub legacy_min_rate_fraction: f64,
}

impl Default for AdaptationConfig {
    fn default() -> Self {
        Self {
            recording_interval_s: 10.0,
            measurement_window_s: 600.0,
            monitor_capacity: 60,
            min_step_time_s: 600.0,
            min_time_between_s: 300.0,
            temp_error_threshold: 20.0,
            rate_threshold: 0.85,
            reduction_factor: 0.9,
            legacy_min_rate_fraction: 0.70,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub max_temp: f64,
    /// Allowed rise above the observed minimum while the output is off
    pub cooling_rise_hysteresis: f64,
    /// Thermal lag allowance after the output turns off
    pub cooling_grace_s: f64,
    pub sensor_retry_limit: u32,
    pub ramp_tolerance: f64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_temp: 1_300.0,
            cooling_rise_hysteresis: 10.0,
            cooling_grace_s: 120.0,
            sensor_retry_limit: 3,
            ramp_tolerance: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningConfig {
    pub plateau_window: usize,
    pub plateau_sample_interval_s: f64,
    pub plateau_range: f64,
    pub phase_timeout_s: f64,
    pub cooldown_timeout_s: f64,
    /// Cooldown ends within this margin of the starting temperature
    pub cooldown_margin: f64,
    /// A heating phase must move the temperature at least this much
    pub min_response_rise: f64,
    pub default_heat_loss_h: f64,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            plateau_window: 5,
            plateau_sample_interval_s: 60.0,
            plateau_range: 0.5,
            phase_timeout_s: 600.0,
            cooldown_timeout_s: 1_800.0,
            cooldown_margin: 20.0,
            min_response_rise: 2.0,
            default_heat_loss_h: 0.0001,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub command_capacity: usize,
    pub status_capacity: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            command_capacity: 10,
            status_capacity: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub enabled: bool,
    /// Older log rows are not resumed
    pub max_age_s: i64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_age_s: 900,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub run_log_path: String,
    pub profile_dir: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            run_log_path: "data/logs/kiln_run.csv".into(),
            profile_dir: "profiles".into(),
        }
    }
}

impl KilnConfig {
    /// Load from a JSON file; missing sections take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())?;
        let config: KilnConfig = serde_json::from_str(&raw)
            .map_err(|e| KilnError::ConfigInvalid(format!("{}: {}", path.as_ref().display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that must never reach the control loop.
    pub fn validate(&self) -> Result<()> {
        let c = &self.control;
        if c.tick_interval_ms == 0 || c.output_slots_per_tick == 0 || c.status_interval_ms == 0 {
            return Err(KilnError::ConfigInvalid("control intervals must be non-zero".into()));
        }
        if !(c.time_scale.is_finite() && c.time_scale > 0.0) {
            return Err(KilnError::ConfigInvalid("time_scale must be positive".into()));
        }

        // Builds and validates the strategy (range overlap, capacity, h >= 0)
        GainScheduler::from_config(&self.gain_schedule, self.pid.gains())?;

        let a = &self.adaptation;
        if a.monitor_capacity < 2 || a.recording_interval_s <= 0.0 || a.measurement_window_s <= 0.0 {
            return Err(KilnError::ConfigInvalid("rate monitor needs >= 2 samples and positive intervals".into()));
        }
        if !(0.0..=1.0).contains(&a.rate_threshold) || !(0.0..1.0).contains(&a.reduction_factor) {
            return Err(KilnError::ConfigInvalid("adaptation factors must lie in [0, 1)".into()));
        }
        if a.min_step_time_s < 0.0 || a.min_time_between_s < 0.0 {
            return Err(KilnError::ConfigInvalid("adaptation timings must not be negative".into()));
        }
        if !(0.0..1.0).contains(&a.legacy_min_rate_fraction) {
            return Err(KilnError::ConfigInvalid("legacy_min_rate_fraction must lie in [0, 1)".into()));
        }

        let s = &self.safety;
        if !(s.max_temp.is_finite() && s.max_temp > 0.0) {
            return Err(KilnError::ConfigInvalid("max_temp must be positive".into()));
        }
        if s.cooling_rise_hysteresis <= 0.0 || s.ramp_tolerance <= 0.0 {
            return Err(KilnError::ConfigInvalid("safety tolerances must be positive".into()));
        }
        if s.cooling_grace_s < 0.0 {
            return Err(KilnError::ConfigInvalid("cooling_grace_s must not be negative".into()));
        }

        let t = &self.tuning;
        if t.plateau_window < 2 || t.plateau_sample_interval_s <= 0.0 || t.phase_timeout_s <= 0.0 {
            return Err(KilnError::ConfigInvalid("tuning plateau window/timeouts invalid".into()));
        }
        if t.cooldown_timeout_s < 0.0 {
            return Err(KilnError::ConfigInvalid("cooldown_timeout_s must not be negative".into()));
        }

        if self.link.command_capacity == 0 || self.link.status_capacity == 0 {
            return Err(KilnError::ConfigInvalid("link capacities must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = KilnConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.adaptation.monitor_capacity, 60);
        assert_eq!(cfg.link.command_capacity, 10);
        assert_eq!(cfg.link.status_capacity, 100);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: KilnConfig = serde_json::from_str(
            r#"{ "safety": { "max_temp": 1250.0 },
                 "gain_schedule": { "strategy": "continuous", "h": 0.0002, "ambient_temp": 22.0 } }"#,
        )
        .unwrap();
        assert_eq!(cfg.safety.max_temp, 1250.0);
        assert_eq!(cfg.safety.sensor_retry_limit, 3);
        assert_eq!(cfg.tuning.plateau_window, 5);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn overlapping_gain_table_rejected() {
        let cfg: KilnConfig = serde_json::from_str(
            r#"{ "gain_schedule": { "strategy": "range_table", "ranges": [
                  { "temp_min": 0.0, "temp_max": 400.0, "kp": 5.0, "ki": 0.01, "kd": 20.0 },
                  { "temp_min": 300.0, "temp_max": 2000.0, "kp": 7.0, "ki": 0.02, "kd": 30.0 } ] } }"#,
        )
        .unwrap();
        assert!(matches!(cfg.validate(), Err(KilnError::ConfigInvalid(_))));
    }

    #[test]
    fn negative_timings_rejected() {
        let cases: [fn(&mut KilnConfig); 4] = [
            |c| c.safety.cooling_grace_s = -1.0,
            |c| c.adaptation.min_step_time_s = -1.0,
            |c| c.adaptation.min_time_between_s = -1.0,
            |c| c.tuning.cooldown_timeout_s = -1.0,
        ];
        for set in cases {
            let mut cfg = KilnConfig::default();
            set(&mut cfg);
            assert!(matches!(cfg.validate(), Err(KilnError::ConfigInvalid(_))));
        }
    }
}
