//! messages.rs
//! Plain-data payloads crossing between the control core and the supervisory core.
//!
//! Every message is owned and copied into the queue; nothing here holds a reference
//! into either side's state.

use serde::{Deserialize, Serialize};

use crate::control_core::gain_scheduler::Gains;
use crate::control_core::pid::PidTerms;
use crate::control_core::profile::Profile;
use crate::control_core::scheduler::ScheduleStatus;
use crate::control_core::thermal_fit::{QualityGrade, TuningMethod, TuningResult};
use crate::control_core::tuner::TuningMode;

/// Supervisory → control requests. Acted upon at the next tick boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    RunProfile { profile: Profile },
    Stop,
    Shutdown,
    ScheduleProfile { profile: Profile, start_time_epoch: i64 },
    CancelScheduled,
    StartTuning { mode: TuningMode },
    StopTuning,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::RunProfile { .. } => "run_profile",
            Command::Stop => "stop",
            Command::Shutdown => "shutdown",
            Command::ScheduleProfile { .. } => "schedule_profile",
            Command::CancelScheduled => "cancel_scheduled",
            Command::StartTuning { .. } => "start_tuning",
            Command::StopTuning => "stop_tuning",
        }
    }

    /// The heating output must drop in the same tick this command is seen.
    pub fn forces_output_off(&self) -> bool {
        matches!(self, Command::Stop | Command::Shutdown | Command::StopTuning)
    }
}

/// Controller state as published and logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateLabel {
    Idle,
    Running,
    Tuning,
    Error,
    Recovery,
}

impl StateLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            StateLabel::Idle => "IDLE",
            StateLabel::Running => "RUNNING",
            StateLabel::Tuning => "TUNING",
            StateLabel::Error => "ERROR",
            StateLabel::Recovery => "RECOVERY",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileStatus {
    pub profile_name: String,
    pub step_index: usize,
    pub total_steps: usize,
    /// "ramp" or "hold"
    pub step_type: String,
    pub step_name: String,
    pub elapsed_seconds: f64,
    pub progress_percent: f64,
    pub desired_rate: Option<f64>,
    pub current_rate: Option<f64>,
    pub actual_rate: Option<f64>,
    pub adaptation_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningStatus {
    pub mode: TuningMode,
    pub phase_index: usize,
    pub total_phases: usize,
    pub phase_name: String,
    pub elapsed_seconds: f64,
    pub progress_percent: f64,
}

/// Compact view of the last finished tuning session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningSummary {
    pub mode: TuningMode,
    pub grade: QualityGrade,
    pub score: f64,
    pub recommended_method: TuningMethod,
    pub gains: Gains,
    pub heat_loss_h: f64,
}

impl From<&TuningResult> for TuningSummary {
    fn from(result: &TuningResult) -> Self {
        Self {
            mode: result.mode,
            grade: result.quality.grade,
            score: result.quality.score,
            recommended_method: result.recommended_method,
            gains: result.recommended,
            heat_loss_h: result.model.heat_loss_h,
        }
    }
}

/// Control → supervisory snapshot, published every status interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub seq: u64,
    /// Epoch seconds of the tick that produced this snapshot
    pub timestamp: f64,
    pub state: StateLabel,
    pub error: Option<String>,
    pub current_temp: Option<f64>,
    pub target_temp: Option<f64>,
    pub output_percent: f64,
    pub output_on: bool,
    pub gains: Gains,
    pub terms: PidTerms,
    pub profile: Option<ProfileStatus>,
    pub tuning: Option<TuningStatus>,
    pub scheduled: Option<ScheduleStatus>,
    pub last_command_error: Option<String>,
    pub last_tuning: Option<TuningSummary>,
}
