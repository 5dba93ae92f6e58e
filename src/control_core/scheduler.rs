//! scheduler.rs
//! Single-slot queue for "start profile at epoch T".

use log::info;
use serde::{Deserialize, Serialize};

use crate::control_core::profile::Profile;
use crate::error::{KilnError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleStatus {
    pub profile_name: String,
    pub start_time_epoch: i64,
    pub seconds_until_start: i64,
}

#[derive(Debug, Clone)]
struct ScheduledProfile {
    profile: Profile,
    start_time_epoch: i64,
}

#[derive(Debug, Clone, Default)]
pub struct ScheduleQueue {
    pending: Option<ScheduledProfile>,
}

impl ScheduleQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, profile: Profile, start_time_epoch: i64, now_epoch: i64) -> Result<()> {
        if start_time_epoch <= now_epoch {
            return Err(KilnError::ScheduleRejected(format!(
                "start time {} is not in the future (now {})",
                start_time_epoch, now_epoch
            )));
        }
        if let Some(existing) = &self.pending {
            return Err(KilnError::ScheduleRejected(format!(
                "'{}' is already scheduled; cancel it first",
                existing.profile.name
            )));
        }
        info!(
            "[Scheduler] '{}' scheduled in {}s",
            profile.name,
            start_time_epoch - now_epoch
        );
        self.pending = Some(ScheduledProfile { profile, start_time_epoch });
        Ok(())
    }

    /// Drop the pending entry, returning its profile name.
    pub fn cancel(&mut self) -> Option<String> {
        let cancelled = self.pending.take().map(|s| s.profile.name);
        if let Some(name) = &cancelled {
            info!("[Scheduler] cancelled '{}'", name);
        }
        cancelled
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn status(&self, now_epoch: i64) -> Option<ScheduleStatus> {
        self.pending.as_ref().map(|s| ScheduleStatus {
            profile_name: s.profile.name.clone(),
            start_time_epoch: s.start_time_epoch,
            seconds_until_start: (s.start_time_epoch - now_epoch).max(0),
        })
    }

    /// Remove and return the profile once its start time has arrived.
    pub fn take_due(&mut self, now_epoch: i64) -> Option<Profile> {
        let due = self
            .pending
            .as_ref()
            .is_some_and(|s| s.start_time_epoch <= now_epoch);
        if !due {
            return None;
        }
        self.pending.take().map(|s| s.profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_core::profile::{ProfileStep, TemperatureUnit};

    fn profile(name: &str) -> Profile {
        Profile {
            name: name.into(),
            temperature_unit: TemperatureUnit::Celsius,
            description: String::new(),
            steps: vec![ProfileStep::Hold { target_temp: 100.0, duration_seconds: 60.0 }],
        }
    }

    #[test]
    fn rejects_past_and_present_start() {
        let mut q = ScheduleQueue::new();
        assert!(matches!(q.schedule(profile("a"), 1_000, 1_000), Err(KilnError::ScheduleRejected(_))));
        assert!(matches!(q.schedule(profile("a"), 999, 1_000), Err(KilnError::ScheduleRejected(_))));
        assert!(!q.is_pending());
    }

    #[test]
    fn only_one_pending() {
        let mut q = ScheduleQueue::new();
        q.schedule(profile("a"), 2_000, 1_000).unwrap();
        assert!(matches!(q.schedule(profile("b"), 3_000, 1_000), Err(KilnError::ScheduleRejected(_))));
        assert_eq!(q.cancel().as_deref(), Some("a"));
        assert!(q.cancel().is_none());
        q.schedule(profile("b"), 3_000, 1_000).unwrap();
        assert_eq!(q.status(1_000).unwrap().profile_name, "b");
    }

    #[test]
    fn status_and_due() {
        let mut q = ScheduleQueue::new();
        q.schedule(profile("bisque"), 1_600, 1_000).unwrap();
        let s = q.status(1_000).unwrap();
        assert_eq!(s.start_time_epoch, 1_600);
        assert_eq!(s.seconds_until_start, 600);
        assert_eq!(q.status(2_000).unwrap().seconds_until_start, 0);

        assert!(q.take_due(1_599).is_none());
        assert_eq!(q.take_due(1_600).unwrap().name, "bisque");
        assert!(q.take_due(1_601).is_none());
        assert!(q.status(1_601).is_none());
    }
}
