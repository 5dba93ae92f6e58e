//! controller.rs
//! Control Supervisor: the top-level state machine, driven once per control tick.
//!
//! ```text
//! Idle ──run / schedule due──▶ Running ──completed / stop──▶ Idle
//! Idle ──start tuning──▶ Tuning ──finished / stop──▶ Idle
//! any ──fatal fault──▶ Error ──stop──▶ Idle
//! (restart) ──▶ Recovering ──▶ Running | Idle
//! ```
//!
//! Per tick: read temperature, safety checks, schedule check when idle, advance the
//! profile or the tuner, gain schedule + PID, and return the heating output.
//! The output is zero in every state except `Running` and `Tuning`, and zero on
//! every fault.

use log::{debug, error, info, warn};

use crate::config::KilnConfig;
use crate::control_core::gain_scheduler::GainScheduler;
use crate::control_core::pid::Pid;
use crate::control_core::profile::Profile;
use crate::control_core::profile_runner::{ProfileRunner, RunEvent};
use crate::control_core::recovery::RecoveryPlan;
use crate::control_core::safety::SafetyMonitor;
use crate::control_core::scheduler::ScheduleQueue;
use crate::control_core::thermal_fit::TuningResult;
use crate::control_core::tuner::{AutoTuner, TunerStep};
use crate::error::{KilnError, Result};
use crate::link::messages::{Command, ProfileStatus, StateLabel, StatusSnapshot, TuningStatus, TuningSummary};

#[derive(Debug, Clone, PartialEq)]
pub enum ControllerState {
    Idle,
    Running,
    Tuning,
    Error(String),
    Recovering,
}

impl ControllerState {
    pub fn label(&self) -> StateLabel {
        match self {
            ControllerState::Idle => StateLabel::Idle,
            ControllerState::Running => StateLabel::Running,
            ControllerState::Tuning => StateLabel::Tuning,
            ControllerState::Error(_) => StateLabel::Error,
            ControllerState::Recovering => StateLabel::Recovery,
        }
    }
}

/// One control tick's inputs.
#[derive(Debug)]
pub struct TickInput {
    /// Logical seconds, monotonic
    pub now: f64,
    /// Wall-clock epoch seconds, for the scheduler and the status timestamp
    pub epoch: f64,
    pub reading: Result<f64>,
}

pub struct Controller {
    config: KilnConfig,
    state: ControllerState,
    pid: Pid,
    gains: GainScheduler,
    safety: SafetyMonitor,
    queue: ScheduleQueue,
    runner: Option<ProfileRunner>,
    tuner: Option<AutoTuner>,
    pending_recovery: Option<(RecoveryPlan, Profile)>,

    last_tick: Option<f64>,
    last_epoch: f64,
    last_temp: Option<f64>,
    target_temp: Option<f64>,
    output: f64,
    sensor_failures: u32,

    last_command_error: Option<String>,
    last_tuning: Option<TuningResult>,
    shutdown_requested: bool,
    seq: u64,
}

impl Controller {
    pub fn new(config: KilnConfig) -> Result<Self> {
        config.validate()?;
        let gains = GainScheduler::from_config(&config.gain_schedule, config.pid.gains())?;
        Ok(Self {
            pid: Pid::new(config.pid.gains()),
            gains,
            safety: SafetyMonitor::new(config.safety.clone()),
            queue: ScheduleQueue::new(),
            config,
            state: ControllerState::Idle,
            runner: None,
            tuner: None,
            pending_recovery: None,
            last_tick: None,
            last_epoch: 0.0,
            last_temp: None,
            target_temp: None,
            output: 0.0,
            sensor_failures: 0,
            last_command_error: None,
            last_tuning: None,
            shutdown_requested: false,
            seq: 0,
        })
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn output(&self) -> f64 {
        self.output
    }

    pub fn pid(&self) -> &Pid {
        &self.pid
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested
    }

    pub fn last_tuning_result(&self) -> Option<&TuningResult> {
        self.last_tuning.as_ref()
    }

    pub fn last_command_error(&self) -> Option<&str> {
        self.last_command_error.as_deref()
    }

    /// Arm a resume of an interrupted run; it takes effect on the next tick.
    pub fn begin_recovery(&mut self, plan: RecoveryPlan, profile: Profile) {
        if self.state != ControllerState::Idle {
            warn!("[Controller] recovery ignored while {}", self.state.label().as_str());
            return;
        }
        info!(
            "[Controller] recovering '{}' at step {}",
            plan.profile_name, plan.step_index
        );
        self.pending_recovery = Some((plan, profile));
        self.transition(ControllerState::Recovering);
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Apply one command. Returns true when the heating output must be forced off now.
    pub fn handle_command(&mut self, command: Command, epoch: f64) -> bool {
        let force_off = command.forces_output_off();
        if force_off {
            self.output = 0.0;
        }
        let name = command.name();

        let outcome = match command {
            Command::RunProfile { profile } => self.start_profile(profile),
            Command::Stop => {
                self.stop();
                Ok(())
            }
            Command::Shutdown => {
                info!("[Controller] shutdown requested");
                self.stop();
                self.shutdown_requested = true;
                Ok(())
            }
            Command::ScheduleProfile { profile, start_time_epoch } => self.schedule(profile, start_time_epoch, epoch),
            Command::CancelScheduled => self
                .queue
                .cancel()
                .map(|_| ())
                .ok_or_else(|| KilnError::ScheduleRejected("nothing is scheduled".into())),
            Command::StartTuning { mode } => {
                if self.state == ControllerState::Idle {
                    self.tuner = Some(AutoTuner::new(mode, self.config.tuning.clone()));
                    self.transition(ControllerState::Tuning);
                    Ok(())
                } else {
                    Err(self.rejection("start tuning"))
                }
            }
            Command::StopTuning => {
                if self.state == ControllerState::Tuning {
                    self.tuner = None;
                    self.transition(ControllerState::Idle);
                    Ok(())
                } else {
                    Err(self.rejection("stop tuning"))
                }
            }
        };

        match outcome {
            Ok(()) => self.last_command_error = None,
            Err(e) => {
                warn!("[Controller] '{}' rejected: {}", name, e);
                self.last_command_error = Some(format!("{}: {}", name, e));
            }
        }
        force_off
    }

    fn rejection(&self, what: &str) -> KilnError {
        KilnError::CommandRejected(format!("cannot {} while {}", what, self.state.label().as_str()))
    }

    fn start_profile(&mut self, profile: Profile) -> Result<()> {
        if self.state != ControllerState::Idle {
            return Err(self.rejection("run a profile"));
        }
        profile.validate(self.safety.max_temp())?;
        self.runner = Some(ProfileRunner::new(
            profile,
            self.config.adaptation.clone(),
            self.config.safety.ramp_tolerance,
        ));
        self.transition(ControllerState::Running);
        Ok(())
    }

    fn schedule(&mut self, profile: Profile, start_time_epoch: i64, epoch: f64) -> Result<()> {
        profile.validate(self.safety.max_temp())?;
        self.queue.schedule(profile, start_time_epoch, epoch.floor() as i64)
    }

    fn stop(&mut self) {
        self.output = 0.0;
        self.target_temp = None;
        match self.state {
            ControllerState::Idle => {}
            ControllerState::Error(_) => {
                info!("[Controller] error acknowledged");
                self.transition(ControllerState::Idle);
            }
            _ => {
                self.runner = None;
                self.tuner = None;
                self.pending_recovery = None;
                self.transition(ControllerState::Idle);
            }
        }
    }

    // ========================================================================
    // Tick
    // ========================================================================

    /// One control tick. Returns the heating output percent for this tick.
    pub fn tick(&mut self, input: TickInput) -> f64 {
        let TickInput { now, epoch, reading } = input;
        let dt = self
            .last_tick
            .map_or(self.config.control.tick_interval_s(), |t| now - t);
        self.last_tick = Some(now);
        self.last_epoch = epoch;

        let Some(temp) = self.accept_reading(reading) else {
            return self.apply_output(now, 0.0);
        };

        if let Err(e) = self.safety.check(now, temp) {
            self.fail(e);
            return self.apply_output(now, 0.0);
        }

        if self.state == ControllerState::Idle {
            if let Some(profile) = self.queue.take_due(epoch.floor() as i64) {
                info!("[Controller] scheduled profile '{}' is due", profile.name);
                if let Err(e) = self.start_profile(profile) {
                    warn!("[Controller] scheduled start failed: {}", e);
                    self.last_command_error = Some(format!("schedule: {}", e));
                }
            }
        }
        if self.state == ControllerState::Recovering {
            self.resume_recovery(now, temp);
        }

        let demand = match self.state {
            ControllerState::Running => self.run_tick(now, temp, dt),
            ControllerState::Tuning => self.tuning_tick(now, temp),
            _ => {
                self.target_temp = None;
                0.0
            }
        };
        self.apply_output(now, demand)
    }

    fn accept_reading(&mut self, reading: Result<f64>) -> Option<f64> {
        let fault = match reading {
            Ok(t) if t.is_finite() => {
                self.sensor_failures = 0;
                self.last_temp = Some(t);
                return Some(t);
            }
            Ok(t) => format!("non-finite reading {}", t),
            Err(e) => e.to_string(),
        };

        self.sensor_failures += 1;
        let limit = self.config.safety.sensor_retry_limit;
        warn!(
            "[Controller] sensor read failed ({}/{}): {}",
            self.sensor_failures, limit, fault
        );
        if self.sensor_failures > limit {
            self.fail(KilnError::SensorFault(format!(
                "{} consecutive failures, last: {}",
                self.sensor_failures, fault
            )));
        }
        None
    }

    fn apply_output(&mut self, now: f64, demand: f64) -> f64 {
        let active = matches!(self.state, ControllerState::Running | ControllerState::Tuning);
        let output = if active && demand.is_finite() {
            demand.clamp(0.0, 100.0)
        } else {
            0.0
        };
        self.output = output;
        self.safety.note_output(now, output);
        output
    }

    fn resume_recovery(&mut self, now: f64, temp: f64) {
        let Some((plan, profile)) = self.pending_recovery.take() else {
            self.transition(ControllerState::Idle);
            return;
        };

        let resumed = profile.validate(self.safety.max_temp()).and_then(|()| {
            let mut runner = ProfileRunner::new(
                profile,
                self.config.adaptation.clone(),
                self.config.safety.ramp_tolerance,
            );
            runner.resume(plan.step_index, plan.current_rate, plan.elapsed_seconds, now, temp)?;
            Ok(runner)
        });

        match resumed {
            Ok(runner) => {
                self.runner = Some(runner);
                self.pid.reset();
                self.transition(ControllerState::Running);
            }
            Err(e) => {
                warn!("[Controller] recovery of '{}' abandoned: {}", plan.profile_name, e);
                self.transition(ControllerState::Idle);
            }
        }
    }

    fn run_tick(&mut self, now: f64, temp: f64, dt: f64) -> f64 {
        let Some(runner) = self.runner.as_mut() else {
            self.transition(ControllerState::Idle);
            return 0.0;
        };
        let starting = !runner.is_started();
        if starting {
            runner.start(now, temp);
        }
        let outcome = runner.advance(now, temp);
        let target = runner.target_temp(now);
        let name = runner.profile().name.clone();

        if starting {
            self.pid.reset();
        }

        match outcome {
            Ok(RunEvent::Completed) => {
                info!("[Controller] profile '{}' completed", name);
                self.runner = None;
                self.target_temp = None;
                self.transition(ControllerState::Idle);
                0.0
            }
            Ok(event) => {
                if let RunEvent::StepAdvanced { from, to } = event {
                    debug!("[Controller] '{}' step {} → {}", name, from, to);
                }
                self.target_temp = target;
                match target {
                    Some(target) => self.pid_output(target, temp, dt),
                    None => 0.0,
                }
            }
            Err(e) => {
                self.fail(e);
                0.0
            }
        }
    }

    fn pid_output(&mut self, target: f64, temp: f64, dt: f64) -> f64 {
        let scheduled = self.gains.gains_for(temp);
        if scheduled.differs_from(&self.pid.gains()) {
            debug!(
                "[Controller] gains at {:.0}°C → kp {:.3} ki {:.5} kd {:.2}",
                temp, scheduled.kp, scheduled.ki, scheduled.kd
            );
            self.pid.set_gains(scheduled);
        }
        self.pid.update(target, temp, dt)
    }

    fn tuning_tick(&mut self, now: f64, temp: f64) -> f64 {
        self.target_temp = None;
        let Some(tuner) = self.tuner.as_mut() else {
            self.transition(ControllerState::Idle);
            return 0.0;
        };

        match tuner.advance(now, temp) {
            Ok(TunerStep::Power(power)) => power,
            Ok(TunerStep::Finished(result)) => {
                info!(
                    "[Controller] tuning finished: {:?} → kp {:.3} ki {:.5} kd {:.2}",
                    result.recommended_method, result.recommended.kp, result.recommended.ki, result.recommended.kd
                );
                self.last_tuning = Some(*result);
                self.tuner = None;
                self.transition(ControllerState::Idle);
                0.0
            }
            Err(e) => {
                self.fail(e);
                0.0
            }
        }
    }

    /// Force the output off and enter `Error`. The first fault's reason is kept.
    fn fail(&mut self, e: KilnError) {
        self.output = 0.0;
        self.target_temp = None;
        if let ControllerState::Error(reason) = &self.state {
            debug!("[Controller] already in error ({}), also: {}", reason, e);
            return;
        }
        error!("[Controller] {} → ERROR: {}", self.state.label().as_str(), e);
        self.runner = None;
        self.tuner = None;
        self.pending_recovery = None;
        self.pid.reset();
        self.state = ControllerState::Error(e.to_string());
    }

    fn transition(&mut self, next: ControllerState) {
        if self.state != next {
            info!(
                "[Controller] {} → {}",
                self.state.label().as_str(),
                next.label().as_str()
            );
            self.state = next;
        }
    }

    // ========================================================================
    // Status
    // ========================================================================

    pub fn snapshot(&mut self) -> StatusSnapshot {
        self.seq += 1;
        let now = self.last_tick.unwrap_or(0.0);
        let temp = self.last_temp.unwrap_or(0.0);

        let profile = self.runner.as_ref().and_then(|r| {
            let step = r.current_step()?;
            Some(ProfileStatus {
                profile_name: r.profile().name.clone(),
                step_index: r.step_index()?,
                total_steps: r.profile().total_steps(),
                step_type: step.kind().to_string(),
                step_name: step.describe(),
                elapsed_seconds: r.elapsed(now),
                progress_percent: r.progress_percent(now, temp),
                desired_rate: r.desired_rate(),
                current_rate: r.current_rate(),
                actual_rate: r.actual_rate(),
                adaptation_count: r.adaptation_count(),
            })
        });

        let tuning = self.tuner.as_ref().map(|t| TuningStatus {
            mode: t.mode(),
            phase_index: t.phase_index(),
            total_phases: t.total_phases(),
            phase_name: t.current_phase().map(|p| p.label()).unwrap_or_default(),
            elapsed_seconds: t.elapsed(now),
            progress_percent: t.progress_percent(now),
        });

        let error = match &self.state {
            ControllerState::Error(reason) => Some(reason.clone()),
            _ => None,
        };

        StatusSnapshot {
            seq: self.seq,
            timestamp: self.last_epoch,
            state: self.state.label(),
            error,
            current_temp: self.last_temp,
            target_temp: self.target_temp,
            output_percent: self.output,
            output_on: self.output > 0.0,
            gains: self.pid.gains(),
            terms: self.pid.terms(),
            profile,
            tuning,
            scheduled: self.queue.status(self.last_epoch.floor() as i64),
            last_command_error: self.last_command_error.clone(),
            last_tuning: self.last_tuning.as_ref().map(TuningSummary::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_core::gain_scheduler::{GainRange, GainScheduleConfig};
    use crate::control_core::profile::{ProfileStep, TemperatureUnit};
    use crate::control_core::tuner::TuningMode;

    fn controller() -> Controller {
        Controller::new(KilnConfig::default()).unwrap()
    }

    fn tick(c: &mut Controller, now: f64, temp: f64) -> f64 {
        c.tick(TickInput { now, epoch: 1_000_000.0 + now, reading: Ok(temp) })
    }

    fn profile(steps: Vec<ProfileStep>) -> Profile {
        Profile {
            name: "unit".into(),
            temperature_unit: TemperatureUnit::Celsius,
            description: String::new(),
            steps,
        }
    }

    fn ramp_to(target: f64) -> Profile {
        profile(vec![ProfileStep::Ramp { target_temp: target, desired_rate: Some(100.0), min_rate: None }])
    }

    #[test]
    fn run_command_heats_toward_target() {
        let mut c = controller();
        assert_eq!(tick(&mut c, 0.0, 25.0), 0.0);
        c.handle_command(Command::RunProfile { profile: ramp_to(600.0) }, 1_000_000.0);
        assert_eq!(c.state(), &ControllerState::Running);

        tick(&mut c, 1.0, 25.0);
        let mut out = 0.0;
        for t in 2..120 {
            out = tick(&mut c, t as f64, 25.0);
        }
        assert!(out > 0.0);
        let s = c.snapshot();
        assert_eq!(s.state, StateLabel::Running);
        let p = s.profile.unwrap();
        assert_eq!(p.step_index, 0);
        assert_eq!(p.current_rate, Some(100.0));
        assert!(s.target_temp.unwrap() > 25.0);
    }

    #[test]
    fn ceiling_forces_output_off_and_error() {
        let mut c = controller();
        tick(&mut c, 0.0, 25.0);
        c.handle_command(Command::RunProfile { profile: ramp_to(1_250.0) }, 0.0);
        tick(&mut c, 1.0, 1_200.0);
        assert_eq!(tick(&mut c, 2.0, 1_301.0), 0.0);
        assert!(matches!(c.state(), ControllerState::Error(_)));
        assert!(c.snapshot().error.unwrap().contains("safety"));

        // Stays off until acknowledged
        assert_eq!(tick(&mut c, 3.0, 1_200.0), 0.0);
        c.handle_command(Command::Stop, 0.0);
        assert_eq!(c.state(), &ControllerState::Idle);
    }

    #[test]
    fn sensor_faults_are_retried_then_fatal() {
        let mut c = controller();
        tick(&mut c, 0.0, 25.0);
        c.handle_command(Command::RunProfile { profile: ramp_to(600.0) }, 0.0);
        tick(&mut c, 1.0, 25.0);
        for i in 0..3 {
            let out = c.tick(TickInput {
                now: 2.0 + i as f64,
                epoch: 0.0,
                reading: Err(KilnError::SensorFault("open thermocouple".into())),
            });
            assert_eq!(out, 0.0);
            assert_eq!(c.state(), &ControllerState::Running);
        }
        // A good reading resets the budget
        tick(&mut c, 5.0, 25.0);
        for i in 0..4 {
            c.tick(TickInput { now: 6.0 + i as f64, epoch: 0.0, reading: Ok(f64::NAN) });
        }
        assert!(matches!(c.state(), ControllerState::Error(reason) if reason.contains("sensor")));
    }

    #[test]
    fn invalid_commands_are_reported() {
        let mut c = controller();
        tick(&mut c, 0.0, 25.0);
        c.handle_command(Command::StopTuning, 0.0);
        assert!(c.last_command_error().unwrap().contains("stop_tuning"));

        c.handle_command(Command::RunProfile { profile: ramp_to(600.0) }, 0.0);
        assert!(c.last_command_error().is_none());
        c.handle_command(Command::RunProfile { profile: ramp_to(700.0) }, 0.0);
        assert!(c.last_command_error().unwrap().contains("RUNNING"));
        c.handle_command(Command::StartTuning { mode: TuningMode::Safe }, 0.0);
        assert_eq!(c.state(), &ControllerState::Running);

        c.handle_command(Command::CancelScheduled, 0.0);
        assert!(c.snapshot().last_command_error.unwrap().contains("nothing is scheduled"));

        let too_hot = ramp_to(1_500.0);
        c.handle_command(Command::Stop, 0.0);
        c.handle_command(Command::RunProfile { profile: too_hot }, 0.0);
        assert_eq!(c.state(), &ControllerState::Idle);
    }

    #[test]
    fn scheduled_profile_starts_when_due() {
        let mut c = controller();
        tick(&mut c, 0.0, 25.0);
        c.handle_command(
            Command::ScheduleProfile { profile: ramp_to(300.0), start_time_epoch: 1_000_010 },
            1_000_000.0,
        );
        let s = c.snapshot();
        assert_eq!(s.scheduled.as_ref().unwrap().seconds_until_start, 10);

        tick(&mut c, 5.0, 25.0);
        assert_eq!(c.state(), &ControllerState::Idle);
        tick(&mut c, 10.0, 25.0);
        assert_eq!(c.state(), &ControllerState::Running);
        assert!(c.snapshot().scheduled.is_none());
    }

    #[test]
    fn range_table_gains_follow_temperature() {
        let mut cfg = KilnConfig::default();
        cfg.gain_schedule = GainScheduleConfig::RangeTable {
            ranges: vec![
                GainRange { temp_min: 0.0, temp_max: 300.0, kp: 4.0, ki: 0.01, kd: 20.0 },
                GainRange { temp_min: 300.0, temp_max: 2_000.0, kp: 8.0, ki: 0.02, kd: 40.0 },
            ],
        };
        let mut c = Controller::new(cfg).unwrap();
        tick(&mut c, 0.0, 250.0);
        c.handle_command(Command::RunProfile { profile: ramp_to(600.0) }, 0.0);
        tick(&mut c, 1.0, 250.0);
        assert_eq!(c.pid().gains().kp, 4.0);
        tick(&mut c, 2.0, 300.0);
        assert_eq!(c.pid().gains().kp, 8.0);
    }

    #[test]
    fn tuning_drives_open_loop_power() {
        let mut c = controller();
        tick(&mut c, 0.0, 25.0);
        c.handle_command(Command::StartTuning { mode: TuningMode::Safe }, 0.0);
        assert_eq!(tick(&mut c, 1.0, 25.0), 40.0);
        let s = c.snapshot();
        assert_eq!(s.state, StateLabel::Tuning);
        assert_eq!(s.tuning.unwrap().phase_name, "heat 40%");

        assert!(c.handle_command(Command::StopTuning, 0.0));
        assert_eq!(c.output(), 0.0);
        assert_eq!(tick(&mut c, 2.0, 26.0), 0.0);
        assert_eq!(c.state(), &ControllerState::Idle);
    }

    #[test]
    fn recovery_resumes_recorded_step() {
        let mut c = controller();
        let p = profile(vec![
            ProfileStep::Ramp { target_temp: 600.0, desired_rate: Some(100.0), min_rate: Some(80.0) },
            ProfileStep::Hold { target_temp: 600.0, duration_seconds: 600.0 },
        ]);
        let plan = RecoveryPlan {
            profile_name: "unit".into(),
            step_index: 1,
            current_rate: None,
            elapsed_seconds: 20_000.0,
            last_temp: Some(598.0),
            recorded_at: 0.0,
        };
        c.begin_recovery(plan, p);
        assert_eq!(c.snapshot().state, StateLabel::Recovery);

        tick(&mut c, 0.0, 590.0);
        assert_eq!(c.state(), &ControllerState::Running);
        let status = c.snapshot().profile.unwrap();
        assert_eq!(status.step_index, 1);
        assert_eq!(status.elapsed_seconds, 20_000.0);
    }

    #[test]
    fn recovery_with_bad_step_falls_back_to_idle() {
        let mut c = controller();
        let plan = RecoveryPlan {
            profile_name: "unit".into(),
            step_index: 9,
            current_rate: None,
            elapsed_seconds: 0.0,
            last_temp: None,
            recorded_at: 0.0,
        };
        c.begin_recovery(plan, ramp_to(600.0));
        assert_eq!(tick(&mut c, 0.0, 100.0), 0.0);
        assert_eq!(c.state(), &ControllerState::Idle);
    }
}
