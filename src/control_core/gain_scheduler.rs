//! gain_scheduler.rs
//! Temperature-dependent PID gains.
//!
//! Two strategies behind `GainScheduler::gains_for`:
//! - **Continuous:** `scale = 1 + h·(T − T_ambient)` applied to the base gains.
//! - **Range table:** up to five half-open `[min, max)` bands, first match wins,
//!   base gains when nothing matches.

use serde::{Deserialize, Serialize};

use crate::error::{KilnError, Result};

pub const MAX_GAIN_RANGES: usize = 5;

/// Change thresholds below which a new gain set is considered identical.
const KP_KD_EPSILON: f64 = 0.01;
const KI_EPSILON: f64 = 0.0001;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Gains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl Gains {
    pub const fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Self { kp, ki, kd }
    }

    pub fn scaled(&self, scale: f64) -> Self {
        Self::new(self.kp * scale, self.ki * scale, self.kd * scale)
    }

    /// True when any gain moved past its write threshold.
    pub fn differs_from(&self, other: &Gains) -> bool {
        (self.kp - other.kp).abs() > KP_KD_EPSILON
            || (self.kd - other.kd).abs() > KP_KD_EPSILON
            || (self.ki - other.ki).abs() > KI_EPSILON
    }

    fn is_valid(&self) -> bool {
        [self.kp, self.ki, self.kd].iter().all(|g| g.is_finite() && *g >= 0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GainRange {
    pub temp_min: f64,
    pub temp_max: f64,
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl GainRange {
    pub fn gains(&self) -> Gains {
        Gains::new(self.kp, self.ki, self.kd)
    }

    #[inline]
    fn contains(&self, temperature: f64) -> bool {
        self.temp_min <= temperature && temperature < self.temp_max
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum GainScheduleConfig {
    Continuous { h: f64, ambient_temp: f64 },
    RangeTable { ranges: Vec<GainRange> },
}

impl Default for GainScheduleConfig {
    fn default() -> Self {
        GainScheduleConfig::Continuous {
            h: 0.0001,
            ambient_temp: 25.0,
        }
    }
}

#[derive(Debug, Clone)]
pub enum GainScheduler {
    Continuous {
        base: Gains,
        h: f64,
        ambient_temp: f64,
    },
    RangeTable {
        ranges: Vec<GainRange>,
        fallback: Gains,
    },
}

impl GainScheduler {
    /// Build and validate a scheduler. `base` doubles as the range-table fallback.
    pub fn from_config(config: &GainScheduleConfig, base: Gains) -> Result<Self> {
        if !base.is_valid() {
            return Err(KilnError::ConfigInvalid(format!("invalid base gains {:?}", base)));
        }

        match config {
            GainScheduleConfig::Continuous { h, ambient_temp } => {
                if !(h.is_finite() && *h >= 0.0) || !ambient_temp.is_finite() {
                    return Err(KilnError::ConfigInvalid(format!(
                        "continuous schedule needs finite h >= 0 (got {})",
                        h
                    )));
                }
                Ok(GainScheduler::Continuous {
                    base,
                    h: *h,
                    ambient_temp: *ambient_temp,
                })
            }
            GainScheduleConfig::RangeTable { ranges } => {
                validate_ranges(ranges)?;
                Ok(GainScheduler::RangeTable {
                    ranges: ranges.clone(),
                    fallback: base,
                })
            }
        }
    }

    pub fn gains_for(&self, temperature: f64) -> Gains {
        match self {
            GainScheduler::Continuous { base, h, ambient_temp } => {
                let scale = 1.0 + h * (temperature - ambient_temp);
                base.scaled(scale.max(0.0))
            }
            GainScheduler::RangeTable { ranges, fallback } => ranges
                .iter()
                .find(|r| r.contains(temperature))
                .map(GainRange::gains)
                .unwrap_or(*fallback),
        }
    }
}

fn validate_ranges(ranges: &[GainRange]) -> Result<()> {
    if ranges.is_empty() || ranges.len() > MAX_GAIN_RANGES {
        return Err(KilnError::ConfigInvalid(format!(
            "gain table must hold 1..={} ranges (got {})",
            MAX_GAIN_RANGES,
            ranges.len()
        )));
    }

    for r in ranges {
        if !(r.temp_min.is_finite() && r.temp_max.is_finite()) || r.temp_min >= r.temp_max {
            return Err(KilnError::ConfigInvalid(format!(
                "gain range [{}, {}) is empty or non-finite",
                r.temp_min, r.temp_max
            )));
        }
        if !r.gains().is_valid() {
            return Err(KilnError::ConfigInvalid(format!(
                "gain range [{}, {}) has invalid gains",
                r.temp_min, r.temp_max
            )));
        }
    }

    let mut sorted: Vec<&GainRange> = ranges.iter().collect();
    sorted.sort_by(|a, b| a.temp_min.total_cmp(&b.temp_min));
    for pair in sorted.windows(2) {
        if pair[1].temp_min < pair[0].temp_max {
            return Err(KilnError::ConfigInvalid(format!(
                "gain ranges [{}, {}) and [{}, {}) overlap",
                pair[0].temp_min, pair[0].temp_max, pair[1].temp_min, pair[1].temp_max
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const A: GainRange = GainRange { temp_min: 0.0, temp_max: 300.0, kp: 4.0, ki: 0.01, kd: 20.0 };
    const B: GainRange = GainRange { temp_min: 300.0, temp_max: 700.0, kp: 6.0, ki: 0.02, kd: 30.0 };

    fn table(ranges: Vec<GainRange>) -> Result<GainScheduler> {
        GainScheduler::from_config(&GainScheduleConfig::RangeTable { ranges }, Gains::new(1.0, 0.001, 1.0))
    }

    #[test]
    fn range_lower_bound_is_inclusive() {
        let s = table(vec![A, B]).unwrap();
        assert_eq!(s.gains_for(300.0), B.gains());
        assert_eq!(s.gains_for(299.999), A.gains());
        assert_eq!(s.gains_for(0.0), A.gains());
    }

    #[test]
    fn uncovered_temperature_falls_back() {
        let s = table(vec![A, B]).unwrap();
        assert_eq!(s.gains_for(700.0), Gains::new(1.0, 0.001, 1.0));
        assert_eq!(s.gains_for(-5.0), Gains::new(1.0, 0.001, 1.0));
    }

    #[test]
    fn table_validation() {
        assert!(table(vec![]).is_err());
        assert!(table(vec![A; 6]).is_err());
        let overlapping = GainRange { temp_min: 250.0, ..B };
        assert!(table(vec![A, overlapping]).is_err());
        let inverted = GainRange { temp_min: 700.0, temp_max: 300.0, ..B };
        assert!(table(vec![inverted]).is_err());
        // Order in the file does not matter
        assert!(table(vec![B, A]).is_ok());
    }

    #[test]
    fn continuous_scaling() {
        let s = GainScheduler::from_config(
            &GainScheduleConfig::Continuous { h: 0.0001, ambient_temp: 40.3 },
            Gains::new(6.11, 0.0132, 29.5),
        )
        .unwrap();
        let g = s.gains_for(1000.0);
        assert_relative_eq!(g.kp, 6.11 * (1.0 + 0.0001 * 959.7), epsilon = 1e-9);
        assert_relative_eq!(g.kp, 6.696, epsilon = 1e-3);
        assert_relative_eq!(g.ki, 0.0132 * 1.09597, epsilon = 1e-9);
        // Monotonic in temperature for h >= 0
        assert!(s.gains_for(1200.0).kp > s.gains_for(600.0).kp);
    }

    #[test]
    fn zero_h_is_constant() {
        let base = Gains::new(5.0, 0.01, 10.0);
        let s = GainScheduler::from_config(&GainScheduleConfig::Continuous { h: 0.0, ambient_temp: 25.0 }, base).unwrap();
        assert_eq!(s.gains_for(20.0), base);
        assert_eq!(s.gains_for(1250.0), base);
    }

    #[test]
    fn negative_h_rejected() {
        let r = GainScheduler::from_config(
            &GainScheduleConfig::Continuous { h: -0.001, ambient_temp: 25.0 },
            Gains::new(1.0, 0.0, 0.0),
        );
        assert!(matches!(r, Err(KilnError::ConfigInvalid(_))));
    }

    #[test]
    fn change_thresholds() {
        let g = Gains::new(6.0, 0.01, 30.0);
        assert!(!g.differs_from(&Gains::new(6.005, 0.01005, 30.009)));
        assert!(g.differs_from(&Gains::new(6.02, 0.01, 30.0)));
        assert!(g.differs_from(&Gains::new(6.0, 0.0102, 30.0)));
        assert!(g.differs_from(&Gains::new(6.0, 0.01, 29.98)));
    }
}
