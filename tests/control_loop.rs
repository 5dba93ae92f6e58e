//! Threaded control loop timing: status cadence and a saturated status ring.

use std::time::Duration;

use kiln_control::{
    KilnConfig,
    config::LinkConfig,
    control_core::{
        control_loop::{ControlCore, ControlLoopStats},
        controller::Controller,
        hardware::ControlHardware,
    },
    link::{
        channel::{SupervisorLink, link},
        messages::Command,
    },
    sim::{KilnModel, SimulatedKiln},
    utils::clock::{Clock, ScaledClock},
};

/// Run the control core for `wall` at 10x, then shut it down.
fn run_for(wall: Duration, link_config: LinkConfig) -> (ControlLoopStats, SupervisorLink, f64) {
    let mut config = KilnConfig::default();
    config.control.time_scale = 10.0;
    config.control.control_core = 0;
    config.link = link_config;

    let clock = ScaledClock::new(config.control.time_scale);
    let kiln = SimulatedKiln::new(KilnModel::default(), clock.clone(), 7);
    let (control, supervisor) = link(&config.link);
    let controller = Controller::new(config.clone()).unwrap();
    let hardware = ControlHardware::new(kiln.sensor(), kiln.heater());
    let started = clock.now();
    let handle = ControlCore::new(controller, hardware, control, clock.clone(), config.control.clone())
        .spawn()
        .unwrap();

    std::thread::sleep(wall);
    supervisor.commands.send(Command::Shutdown).unwrap();
    let stats = handle.join().unwrap();
    (stats, supervisor, clock.now() - started)
}

#[test]
fn status_cadence_follows_status_interval() {
    let (stats, _supervisor, logical_s) = run_for(Duration::from_secs(2), LinkConfig::default());

    // 1 s ticks, 500 ms status: two snapshots per tick
    let expected = logical_s / 0.5;
    let published = stats.status_published as f64;
    assert!(
        published >= 0.8 * expected && published <= expected + 2.0,
        "logical {logical_s:.1}s, ticks {}, published {published}, expected ~{expected:.0}",
        stats.ticks
    );
    assert!(stats.status_published > stats.ticks);
}

#[test]
fn saturated_status_ring_keeps_ticks_on_time() {
    let (stats, supervisor, logical_s) = run_for(
        Duration::from_millis(1_500),
        LinkConfig { status_capacity: 4, ..LinkConfig::default() },
    );

    // Nobody drained: every publish past the fourth evicted the oldest
    assert!(stats.status_published > 4);
    assert_eq!(stats.status_dropped, stats.status_published - 4);
    assert_eq!(supervisor.status.dropped(), stats.status_dropped);
    let seqs: Vec<u64> = supervisor.status.drain().iter().map(|s| s.seq).collect();
    let newest = stats.status_published;
    assert_eq!(seqs, (newest - 3..=newest).collect::<Vec<_>>());

    // The full ring never held the loop back
    let expected_ticks = logical_s / 1.0;
    assert!(
        stats.ticks as f64 >= 0.8 * expected_ticks,
        "{} ticks in {logical_s:.1}s logical",
        stats.ticks
    );
    assert!(stats.deadline_misses <= stats.ticks * 10 / 4, "{stats:?}");
}
