//! profile.rs
//! Firing profiles: ordered ramp/hold steps, loaded from JSON.
//!
//! Two file formats are accepted:
//! - **Stepped:** `{name, temp_units, description, steps:[{type:"ramp"|"hold", ...}]}`
//! - **Legacy:** `{data:[[time_s, temp], ...]}`, converted once at load into ramps/holds.
//!
//! Fahrenheit profiles are converted to Celsius at load; everything downstream is °C.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::{KilnError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TemperatureUnit {
    #[default]
    #[serde(rename = "c", alias = "C")]
    Celsius,
    #[serde(rename = "f", alias = "F")]
    Fahrenheit,
}

impl TemperatureUnit {
    fn to_celsius(self, temp: f64) -> f64 {
        match self {
            TemperatureUnit::Celsius => temp,
            TemperatureUnit::Fahrenheit => (temp - 32.0) * 5.0 / 9.0,
        }
    }

    /// Rates and spans only scale; no offset.
    fn delta_to_celsius(self, delta: f64) -> f64 {
        match self {
            TemperatureUnit::Celsius => delta,
            TemperatureUnit::Fahrenheit => delta * 5.0 / 9.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProfileStep {
    Ramp {
        target_temp: f64,
        /// Degrees per hour. Absent = full power.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        desired_rate: Option<f64>,
        /// Absent = never adapt
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_rate: Option<f64>,
    },
    Hold {
        target_temp: f64,
        #[serde(rename = "duration", alias = "duration_seconds")]
        duration_seconds: f64,
    },
}

impl ProfileStep {
    pub fn target_temp(&self) -> f64 {
        match self {
            ProfileStep::Ramp { target_temp, .. } | ProfileStep::Hold { target_temp, .. } => *target_temp,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ProfileStep::Ramp { .. } => "ramp",
            ProfileStep::Hold { .. } => "hold",
        }
    }

    /// Human-readable label used in status and log rows.
    pub fn describe(&self) -> String {
        match self {
            ProfileStep::Ramp { target_temp, desired_rate: Some(rate), .. } => {
                format!("ramp to {:.0}°C @ {:.0}°C/h", target_temp, rate)
            }
            ProfileStep::Ramp { target_temp, desired_rate: None, .. } => {
                format!("ramp to {:.0}°C (full power)", target_temp)
            }
            ProfileStep::Hold { target_temp, duration_seconds } => {
                format!("hold {:.0}°C for {:.0} min", target_temp, duration_seconds / 60.0)
            }
        }
    }

    fn to_celsius(&self, unit: TemperatureUnit) -> ProfileStep {
        match *self {
            ProfileStep::Ramp { target_temp, desired_rate, min_rate } => ProfileStep::Ramp {
                target_temp: unit.to_celsius(target_temp),
                desired_rate: desired_rate.map(|r| unit.delta_to_celsius(r)),
                min_rate: min_rate.map(|r| unit.delta_to_celsius(r)),
            },
            ProfileStep::Hold { target_temp, duration_seconds } => ProfileStep::Hold {
                target_temp: unit.to_celsius(target_temp),
                duration_seconds,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    /// Unit the profile was authored in. Steps are stored in °C.
    pub temperature_unit: TemperatureUnit,
    pub description: String,
    pub steps: Vec<ProfileStep>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ProfileFile {
    Stepped {
        name: String,
        #[serde(default)]
        temp_units: TemperatureUnit,
        #[serde(default)]
        description: String,
        steps: Vec<ProfileStep>,
    },
    Legacy {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        temp_units: TemperatureUnit,
        data: Vec<(f64, f64)>,
    },
}

impl Profile {
    /// Parse a profile document. `fallback_name` names legacy files that carry none.
    pub fn from_json(raw: &str, fallback_name: &str, legacy_min_rate_fraction: f64) -> Result<Self> {
        let file: ProfileFile = serde_json::from_str(raw)
            .map_err(|e| KilnError::ConfigInvalid(format!("profile '{}': {}", fallback_name, e)))?;

        let profile = match file {
            ProfileFile::Stepped { name, temp_units, description, steps } => Profile {
                name,
                temperature_unit: temp_units,
                description,
                steps: steps.iter().map(|s| s.to_celsius(temp_units)).collect(),
            },
            ProfileFile::Legacy { name, temp_units, data } => {
                let celsius: Vec<(f64, f64)> = data.iter().map(|&(t, temp)| (t, temp_units.to_celsius(temp))).collect();
                Profile {
                    name: name.unwrap_or_else(|| fallback_name.to_string()),
                    temperature_unit: temp_units,
                    description: "converted from time/temperature table".into(),
                    steps: convert_legacy(&celsius, legacy_min_rate_fraction)?,
                }
            }
        };
        Ok(profile)
    }

    pub fn load(path: impl AsRef<Path>, legacy_min_rate_fraction: f64) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)?;
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("profile");
        Self::from_json(&raw, stem, legacy_min_rate_fraction)
    }

    /// Structural checks; `max_temp` is the safety ceiling.
    pub fn validate(&self, max_temp: f64) -> Result<()> {
        if self.steps.is_empty() {
            return Err(KilnError::ConfigInvalid(format!("profile '{}' has no steps", self.name)));
        }
        for (i, step) in self.steps.iter().enumerate() {
            let target = step.target_temp();
            if !target.is_finite() || target < 0.0 || target > max_temp {
                return Err(KilnError::ConfigInvalid(format!(
                    "profile '{}' step {}: target {:.1}°C outside 0..{:.0}°C",
                    self.name, i, target, max_temp
                )));
            }
            match *step {
                ProfileStep::Ramp { desired_rate, min_rate, .. } => {
                    if let Some(rate) = desired_rate {
                        if !(rate.is_finite() && rate > 0.0) {
                            return Err(KilnError::ConfigInvalid(format!(
                                "profile '{}' step {}: desired_rate must be positive",
                                self.name, i
                            )));
                        }
                    }
                    match (desired_rate, min_rate) {
                        (None, Some(_)) => {
                            return Err(KilnError::ConfigInvalid(format!(
                                "profile '{}' step {}: min_rate requires desired_rate",
                                self.name, i
                            )));
                        }
                        (Some(desired), Some(min)) if !(min >= 0.0 && min < desired) => {
                            return Err(KilnError::ConfigInvalid(format!(
                                "profile '{}' step {}: min_rate {:.1} must be below desired_rate {:.1}",
                                self.name, i, min, desired
                            )));
                        }
                        _ => {}
                    }
                }
                ProfileStep::Hold { duration_seconds, .. } => {
                    if !(duration_seconds.is_finite() && duration_seconds > 0.0) {
                        return Err(KilnError::ConfigInvalid(format!(
                            "profile '{}' step {}: hold duration must be positive",
                            self.name, i
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn total_steps(&self) -> usize {
        self.steps.len()
    }
}

/// Pure conversion of a `[time_s, temp]` table into steps.
///
/// The first point only anchors time; the kiln starts from whatever it measures.
pub fn convert_legacy(points: &[(f64, f64)], min_rate_fraction: f64) -> Result<Vec<ProfileStep>> {
    if points.len() < 2 {
        return Err(KilnError::ConfigInvalid("legacy profile needs at least two points".into()));
    }

    points
        .windows(2)
        .map(|pair| {
            let (t0, temp0) = pair[0];
            let (t1, temp1) = pair[1];
            let dt = t1 - t0;
            if !(dt.is_finite() && dt > 0.0) {
                return Err(KilnError::ConfigInvalid(format!(
                    "legacy profile time must increase ({} → {})",
                    t0, t1
                )));
            }
            let delta = temp1 - temp0;
            if delta == 0.0 {
                Ok(ProfileStep::Hold {
                    target_temp: temp1,
                    duration_seconds: dt,
                })
            } else {
                let rate = delta.abs() / dt * 3_600.0;
                Ok(ProfileStep::Ramp {
                    target_temp: temp1,
                    desired_rate: Some(rate),
                    min_rate: Some(min_rate_fraction * rate),
                })
            }
        })
        .collect()
}
