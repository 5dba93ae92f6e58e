//! client.rs
//! Supervisory front end: submits commands and serves the latest status.
//!
//! Every submit is non-blocking. A saturated command queue comes back as the
//! retryable `ChannelFull`; the caller decides whether to try again.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{info, warn};
use parking_lot::RwLock;

use crate::config::KilnConfig;
use crate::control_core::profile::Profile;
use crate::control_core::tuner::TuningMode;
use crate::error::{KilnError, Result};
use crate::link::channel::CommandSender;
use crate::link::messages::{Command, StatusSnapshot};

/// Newest snapshot seen by the status pump.
pub type SharedStatus = Arc<RwLock<Option<StatusSnapshot>>>;

pub struct KilnClient {
    commands: CommandSender,
    latest: SharedStatus,
    config: KilnConfig,
}

impl KilnClient {
    pub fn new(commands: CommandSender, latest: SharedStatus, config: KilnConfig) -> Self {
        Self { commands, latest, config }
    }

    pub fn status(&self) -> Option<StatusSnapshot> {
        self.latest.read().clone()
    }

    pub fn run_profile(&self, profile: Profile) -> Result<()> {
        profile.validate(self.config.safety.max_temp)?;
        info!("[Client] run '{}'", profile.name);
        self.commands.send(Command::RunProfile { profile })
    }

    pub fn stop(&self) -> Result<()> {
        self.commands.send(Command::Stop)
    }

    pub fn shutdown(&self) -> Result<()> {
        self.commands.send(Command::Shutdown)
    }

    /// Checked here against the latest snapshot for a synchronous answer; the
    /// control core checks again when the command arrives.
    pub fn schedule(&self, profile: Profile, start_time_epoch: i64, now_epoch: i64) -> Result<()> {
        if start_time_epoch <= now_epoch {
            return Err(KilnError::ScheduleRejected(format!(
                "start time {} is not in the future",
                start_time_epoch
            )));
        }
        if let Some(pending) = self.latest.read().as_ref().and_then(|s| s.scheduled.as_ref()) {
            return Err(KilnError::ScheduleRejected(format!(
                "'{}' is already scheduled; cancel it first",
                pending.profile_name
            )));
        }
        profile.validate(self.config.safety.max_temp)?;
        info!("[Client] schedule '{}' in {}s", profile.name, start_time_epoch - now_epoch);
        self.commands.send(Command::ScheduleProfile { profile, start_time_epoch })
    }

    pub fn cancel_scheduled(&self) -> Result<()> {
        self.commands.send(Command::CancelScheduled)
    }

    pub fn start_tuning(&self, mode: TuningMode) -> Result<()> {
        info!("[Client] start {} tuning", mode);
        self.commands.send(Command::StartTuning { mode })
    }

    pub fn stop_tuning(&self) -> Result<()> {
        self.commands.send(Command::StopTuning)
    }

    pub fn load_profile(&self, path: impl AsRef<Path>) -> Result<Profile> {
        let profile = Profile::load(path, self.config.adaptation.legacy_min_rate_fraction)?;
        profile.validate(self.config.safety.max_temp)?;
        Ok(profile)
    }

    /// Look a profile up by name in the profile directory: `<name>.json` first,
    /// then any file whose declared name matches.
    pub fn find_profile(&self, name: &str) -> Result<Profile> {
        let dir = PathBuf::from(&self.config.logging.profile_dir);
        let direct = dir.join(format!("{}.json", name));
        if direct.is_file() {
            return self.load_profile(direct);
        }

        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().is_none_or(|e| e != "json") {
                continue;
            }
            match self.load_profile(&path) {
                Ok(profile) if profile.name == name => return Ok(profile),
                Ok(_) => {}
                Err(e) => warn!("[Client] skipping {}: {}", path.display(), e),
            }
        }
        Err(KilnError::ConfigInvalid(format!(
            "no profile named '{}' in {}",
            name,
            dir.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkConfig;
    use crate::control_core::profile::{ProfileStep, TemperatureUnit};
    use crate::link::channel::link;

    fn profile() -> Profile {
        Profile {
            name: "candle".into(),
            temperature_unit: TemperatureUnit::Celsius,
            description: String::new(),
            steps: vec![ProfileStep::Hold { target_temp: 90.0, duration_seconds: 3_600.0 }],
        }
    }

    #[test]
    fn schedule_is_prevalidated() {
        let (control, supervisor) = link(&LinkConfig::default());
        let latest: SharedStatus = Arc::new(RwLock::new(None));
        let client = KilnClient::new(supervisor.commands, latest, KilnConfig::default());

        assert!(matches!(
            client.schedule(profile(), 100, 100),
            Err(KilnError::ScheduleRejected(_))
        ));
        assert_eq!(control.try_recv_command().unwrap(), None);

        client.schedule(profile(), 200, 100).unwrap();
        assert!(matches!(
            control.try_recv_command().unwrap(),
            Some(Command::ScheduleProfile { start_time_epoch: 200, .. })
        ));
    }

    #[test]
    fn full_queue_is_retryable() {
        let cfg = LinkConfig { command_capacity: 1, ..LinkConfig::default() };
        let (_control, supervisor) = link(&cfg);
        let client = KilnClient::new(supervisor.commands, Arc::new(RwLock::new(None)), KilnConfig::default());

        client.stop().unwrap();
        let err = client.stop().unwrap_err();
        assert!(matches!(err, KilnError::ChannelFull));
        assert!(err.is_retryable());
    }

    #[test]
    fn finds_profiles_by_file_or_declared_name() {
        let dir = std::env::temp_dir().join(format!("kiln_profiles_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("slow_bisque.json"),
            r#"{"name":"bisque","temp_units":"c","steps":[{"type":"ramp","target_temp":600,"desired_rate":100}]}"#,
        )
        .unwrap();

        let mut config = KilnConfig::default();
        config.logging.profile_dir = dir.to_string_lossy().into_owned();
        let (_control, supervisor) = link(&config.link);
        let client = KilnClient::new(supervisor.commands, Arc::new(RwLock::new(None)), config);

        assert_eq!(client.find_profile("bisque").unwrap().steps.len(), 1);
        assert_eq!(client.find_profile("slow_bisque").unwrap().name, "bisque");
        assert!(client.find_profile("glaze").is_err());
        let _ = fs::remove_dir_all(&dir);
    }
}
