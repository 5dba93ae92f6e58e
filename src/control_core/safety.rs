//! safety.rs
//! Step-independent safety checks, evaluated on every accepted reading.
//!
//! - Ceiling: any temperature above `max_temp` is fatal.
//! - Cooling watch: with the heating output off for longer than the grace period,
//!   a rise of more than `cooling_rise_hysteresis` above the lowest temperature seen
//!   since then points at a stuck heating element.

use log::error;

use crate::config::SafetyConfig;
use crate::error::{KilnError, Result};

#[derive(Debug, Clone)]
pub struct SafetyMonitor {
    config: SafetyConfig,
    output_off_since: Option<f64>,
    cooling_min: Option<f64>,
}

impl SafetyMonitor {
    pub fn new(config: SafetyConfig) -> Self {
        Self {
            config,
            // Output starts off
            output_off_since: Some(0.0),
            cooling_min: None,
        }
    }

    pub fn max_temp(&self) -> f64 {
        self.config.max_temp
    }

    #[inline]
    pub fn check_ceiling(&self, temp: f64) -> Result<()> {
        if temp > self.config.max_temp {
            error!("[Safety] {:.1}°C above ceiling {:.0}°C", temp, self.config.max_temp);
            return Err(KilnError::SafetyLimitExceeded(format!(
                "temperature {:.1}°C above maximum {:.0}°C",
                temp, self.config.max_temp
            )));
        }
        Ok(())
    }

    pub fn check(&mut self, now: f64, temp: f64) -> Result<()> {
        self.check_ceiling(temp)?;

        let Some(off_since) = self.output_off_since else {
            return Ok(());
        };
        if now - off_since < self.config.cooling_grace_s {
            return Ok(());
        }

        let min = self.cooling_min.map_or(temp, |m| m.min(temp));
        self.cooling_min = Some(min);
        if temp > min + self.config.cooling_rise_hysteresis {
            error!(
                "[Safety] rising {:.1}°C → {:.1}°C with heating off: stuck element?",
                min, temp
            );
            return Err(KilnError::SafetyLimitExceeded(format!(
                "temperature rose from {:.1}°C to {:.1}°C with heating off",
                min, temp
            )));
        }
        Ok(())
    }

    /// Record the output applied this tick. Any heating resets the cooling watch.
    pub fn note_output(&mut self, now: f64, percent: f64) {
        if percent > 0.0 {
            self.output_off_since = None;
            self.cooling_min = None;
        } else if self.output_off_since.is_none() {
            self.output_off_since = Some(now);
        }
    }

    pub fn is_cooling_watch_armed(&self) -> bool {
        self.cooling_min.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> SafetyMonitor {
        SafetyMonitor::new(SafetyConfig::default())
    }

    #[test]
    fn ceiling_is_always_fatal() {
        let mut m = monitor();
        m.note_output(0.0, 100.0);
        assert!(m.check(1.0, 1_300.0).is_ok());
        assert!(matches!(m.check(2.0, 1_300.1), Err(KilnError::SafetyLimitExceeded(_))));
    }

    #[test]
    fn rise_while_off_after_grace_is_fatal() {
        let mut m = monitor();
        m.note_output(0.0, 50.0);
        m.note_output(100.0, 0.0);

        // Thermal lag inside the grace period is tolerated
        assert!(m.check(150.0, 520.0).is_ok());
        assert!(!m.is_cooling_watch_armed());

        assert!(m.check(230.0, 500.0).is_ok());
        assert!(m.is_cooling_watch_armed());
        assert!(m.check(300.0, 480.0).is_ok());
        assert!(m.check(400.0, 489.0).is_ok());
        assert!(matches!(m.check(500.0, 491.0), Err(KilnError::SafetyLimitExceeded(_))));
    }

    #[test]
    fn heating_resets_watch() {
        let mut m = monitor();
        assert!(m.check(200.0, 100.0).is_ok());
        m.note_output(201.0, 20.0);
        assert!(!m.is_cooling_watch_armed());
        // Heating legitimately raises the temperature
        assert!(m.check(300.0, 150.0).is_ok());
    }
}
