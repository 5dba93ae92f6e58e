//! control_loop.rs
//! The control-core thread: fixed-period ticks, SSR slots, command intake, status publish.
//!
//! Per tick:
//! 1. Drain pending commands (Stop / Shutdown / StopTuning drop the relay at once)
//! 2. Read the thermocouple and run one `Controller::tick`
//! 3. Drive the relay slot by slot with `SpinSleeper`, counting late releases
//! 4. At every slot boundary, publish a status snapshot if the status interval has
//!    elapsed (status runs faster than the tick: 500 ms against 1 s by default)
//!
//! Nothing here blocks on the supervisory core: commands are `try_recv`, status is a
//! force-push ring.

use std::{
    io,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::{debug, error, info, warn};
use spin_sleep::{SpinSleeper, SpinStrategy};
use thread_priority::{ThreadBuilderExt, ThreadPriority};

use crate::config::ControlConfig;
use crate::control_core::controller::{Controller, ControllerState, TickInput};
use crate::control_core::hardware::{ControlHardware, HeatingOutput, TemperatureSensor};
use crate::control_core::ssr::TimeProportioner;
use crate::error::KilnError;
use crate::link::channel::ControlLink;
use crate::utils::clock::Clock;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlLoopStats {
    pub ticks: u64,
    pub commands: u64,
    pub deadline_misses: u64,
    pub status_published: u64,
    pub status_dropped: u64,
    pub relay_switches: u64,
    pub final_state: Option<String>,
}

pub struct ControlCore<S, H, C> {
    controller: Controller,
    hardware: ControlHardware<S, H>,
    link: ControlLink,
    clock: C,
    config: ControlConfig,
    ssr: TimeProportioner,
    stats: ControlLoopStats,
}

impl<S, H, C> ControlCore<S, H, C>
where
    S: TemperatureSensor + 'static,
    H: HeatingOutput + 'static,
    C: Clock + 'static,
{
    pub fn new(
        controller: Controller,
        hardware: ControlHardware<S, H>,
        link: ControlLink,
        clock: C,
        config: ControlConfig,
    ) -> Self {
        let ssr = TimeProportioner::new(config.output_slots_per_tick as usize);
        Self {
            controller,
            hardware,
            link,
            clock,
            config,
            ssr,
            stats: ControlLoopStats::default(),
        }
    }

    /// Start the loop on its own max-priority thread, pinned to `control_core`.
    pub fn spawn(self) -> io::Result<JoinHandle<ControlLoopStats>> {
        let core = self.config.control_core;
        thread::Builder::new()
            .name("kiln-control".to_string())
            .spawn_with_priority(ThreadPriority::Max, move |priority| {
                if let Err(e) = priority {
                    warn!("[ControlLoop] running without max priority: {:?}", e);
                }
                let core_ids = core_affinity::get_core_ids().unwrap_or_default();
                match core_ids.get(core) {
                    Some(id) if core_affinity::set_for_current(*id) => {
                        info!("[ControlLoop] pinned to core {}", core)
                    }
                    Some(_) => error!("[ControlLoop] failed to pin to core {}", core),
                    None => warn!("[ControlLoop] core {} not available, running unpinned", core),
                }
                self.run()
            })
    }

    /// Run until a shutdown command or until the supervisory side disappears.
    pub fn run(mut self) -> ControlLoopStats {
        let slots = self.ssr.slots();
        let tick_period = Duration::from_secs_f64(self.config.tick_interval_s() / self.config.time_scale);
        let slot_period = tick_period / slots as u32;
        let status_interval = self.config.status_interval_ms as f64 / 1000.0;
        let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);

        info!(
            "[ControlLoop] started: tick {}ms logical, {} slots, time scale {}",
            self.config.tick_interval_ms, slots, self.config.time_scale
        );

        let mut next_release = Instant::now();
        let mut next_status = self.clock.now();

        loop {
            if !self.drain_commands() || self.controller.is_shutdown_requested() {
                break;
            }

            let reading = self.hardware.read_temperature();
            let now = self.clock.now();
            let output = self.controller.tick(TickInput {
                now,
                epoch: self.clock.epoch(),
                reading,
            });
            self.stats.ticks += 1;
            self.ssr.begin_tick(output);

            for _ in 0..slots {
                self.publish_if_due(&mut next_status, status_interval);
                let on = self.ssr.next_slot();
                self.hardware.set_output(on);

                next_release += slot_period;
                let now = Instant::now();
                if now < next_release {
                    sleeper.sleep(next_release - now);
                } else {
                    self.stats.deadline_misses += 1;
                    // Fell more than a tick behind: re-anchor instead of bursting
                    if now - next_release > tick_period {
                        debug!("[ControlLoop] {:?} behind schedule, re-anchoring", now - next_release);
                        next_release = now;
                    }
                }
            }
        }

        self.ssr.force_off();
        self.hardware.force_off();
        self.publish();

        self.stats.status_dropped = self.link.dropped_status();
        self.stats.relay_switches = self.hardware.switch_count();
        self.stats.final_state = Some(self.controller.state().label().as_str().to_string());
        info!(
            "[ControlLoop] stopped after {} ticks ({} deadline misses, {} status dropped)",
            self.stats.ticks, self.stats.deadline_misses, self.stats.status_dropped
        );
        self.stats
    }

    /// Returns false when the command channel is closed.
    fn drain_commands(&mut self) -> bool {
        loop {
            match self.link.try_recv_command() {
                Ok(Some(command)) => {
                    self.stats.commands += 1;
                    debug!("[ControlLoop] command '{}'", command.name());
                    // Relay drops before the controller changes state
                    if command.forces_output_off() {
                        self.ssr.force_off();
                        self.hardware.force_off();
                    }
                    self.controller.handle_command(command, self.clock.epoch());
                }
                Ok(None) => return true,
                Err(KilnError::ChannelClosed) => {
                    if self.controller.state() != &ControllerState::Idle {
                        error!("[ControlLoop] supervisory core gone while {}; shutting down", self.controller.state().label().as_str());
                    } else {
                        warn!("[ControlLoop] command channel closed; shutting down");
                    }
                    self.ssr.force_off();
                    self.hardware.force_off();
                    return false;
                }
                Err(e) => {
                    warn!("[ControlLoop] command intake: {}", e);
                    return true;
                }
            }
        }
    }

    /// Publish when logical time has reached `next_status`. Stays on the
    /// `status_interval` grid unless more than one interval was missed.
    fn publish_if_due(&mut self, next_status: &mut f64, status_interval: f64) {
        let now = self.clock.now();
        if now < *next_status {
            return;
        }
        self.publish();
        *next_status += status_interval;
        if *next_status <= now {
            *next_status = now + status_interval;
        }
    }

    fn publish(&mut self) {
        self.link.publish(self.controller.snapshot());
        self.stats.status_published += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::KilnConfig;
    use crate::config::LinkConfig;
    use crate::control_core::profile::{Profile, ProfileStep, TemperatureUnit};
    use crate::link::channel::link;
    use crate::link::messages::Command;
    use crate::utils::clock::ManualClock;

    struct FixedSensor(f64);

    impl TemperatureSensor for FixedSensor {
        fn read_celsius(&mut self) -> crate::Result<f64> {
            Ok(self.0)
        }
    }

    /// Relay that remembers every level it was driven to.
    #[derive(Clone, Default)]
    struct RecordingRelay(Arc<Mutex<Vec<bool>>>);

    impl HeatingOutput for RecordingRelay {
        fn set(&mut self, on: bool) {
            self.0.lock().push(on);
        }
        fn is_on(&self) -> bool {
            self.0.lock().last().copied().unwrap_or(false)
        }
    }

    fn ramp() -> Profile {
        Profile {
            name: "ramp".into(),
            temperature_unit: TemperatureUnit::Celsius,
            description: String::new(),
            steps: vec![ProfileStep::Ramp { target_temp: 600.0, desired_rate: None, min_rate: None }],
        }
    }

    #[test]
    fn stop_drops_relay_for_rest_of_tick() {
        let config = KilnConfig::default();
        let (control, supervisor) = link(&LinkConfig::default());
        let clock = Arc::new(ManualClock::new(1_700_000_000.0));
        let relay = RecordingRelay::default();
        let hardware = ControlHardware::new(FixedSensor(25.0), relay.clone());
        let controller = Controller::new(config.clone()).unwrap();
        let mut core = ControlCore::new(controller, hardware, control, clock.clone(), config.control.clone());

        supervisor.commands.send(Command::RunProfile { profile: ramp() }).unwrap();
        assert!(core.drain_commands());
        clock.advance(1.0);
        let out = core.controller.tick(TickInput { now: clock.now(), epoch: clock.epoch(), reading: Ok(25.0) });
        assert!(out > 50.0, "output {out}");
        core.ssr.begin_tick(out);
        let on = core.ssr.next_slot();
        core.hardware.set_output(on);
        assert!(core.hardware.is_on());

        supervisor.commands.send(Command::Stop).unwrap();
        assert!(core.drain_commands());
        assert!(!core.hardware.is_on());
        assert_eq!(core.controller.state(), &ControllerState::Idle);
        assert!((1..core.ssr.slots()).all(|_| !core.ssr.next_slot()));
        assert_eq!(relay.0.lock().as_slice(), &[false, true, false]);
    }

    #[test]
    fn status_published_on_interval_grid() {
        let config = KilnConfig::default();
        let (control, supervisor) = link(&LinkConfig::default());
        let clock = Arc::new(ManualClock::new(1_700_000_000.0));
        let hardware = ControlHardware::new(FixedSensor(25.0), RecordingRelay::default());
        let controller = Controller::new(config.clone()).unwrap();
        let mut core = ControlCore::new(controller, hardware, control, clock.clone(), config.control.clone());

        // Ten 100 ms slots per second of logical time, status every 500 ms
        let mut next_status = clock.now();
        for _ in 0..30 {
            core.publish_if_due(&mut next_status, 0.5);
            clock.advance(0.1);
        }
        assert_eq!(core.stats.status_published, 6);

        // A 2 s stall yields one snapshot, then the grid resumes from there
        clock.advance(2.0);
        core.publish_if_due(&mut next_status, 0.5);
        core.publish_if_due(&mut next_status, 0.5);
        assert_eq!(core.stats.status_published, 7);
        assert_eq!(supervisor.status.drain().len(), 7);
    }
}
