//! # Kiln Controller Entry Point
//!
//! Wires the two cores together around a simulated kiln and offers an
//! interactive menu on the supervisory side.
//!
//! ## Threads
//! - **Control core:** `kiln-control`, max priority, pinned to `control.control_core`.
//!   Owns the thermocouple and the relay. 1 Hz control tick, 10 relay slots per tick.
//! - **Supervisory core:** `kiln-supervisor`, pinned to `control.supervisor_core`,
//!   single-threaded tokio runtime running the status pump (latest status + run log).
//! - **Main thread:** stdin menu; submits commands through `KilnClient`.
//!
//! ## Startup
//! 1. Load `kiln_config.json` (or the path given as the first argument), else defaults
//! 2. Read the run log; resume an interrupted firing when the last row allows it
//! 3. Start both cores, then the menu
//!
//! ## Outputs
//! - `data/logs/kiln_run.csv`: one row per status snapshot, also read back for recovery

use std::{
    io::{Write, stdin, stdout},
    path::Path,
    sync::Arc,
    thread,
    time::Duration,
};

use log::{error, info, warn};
use parking_lot::RwLock;

use kiln_control::{
    KilnConfig, Result,
    control_core::{
        control_loop::ControlCore,
        controller::Controller,
        hardware::ControlHardware,
        profile::Profile,
        recovery::plan_from_records,
        tuner::TuningMode,
    },
    link::{channel::link, messages::StatusSnapshot},
    sim::{KilnModel, SimulatedKiln},
    supervisor_core::{KilnClient, SharedStatus, StatusPump},
    utils::{
        clock::{Clock, ScaledClock},
        run_log::{RunLogWriter, read_records},
    },
};

const DEFAULT_CONFIG_PATH: &str = "kiln_config.json";
const SIM_SEED: u64 = 0x6b69_6c6e;
const STATUS_PUMP_PERIOD: Duration = Duration::from_millis(250);

fn main() {
    env_logger::init();
    info!("=== KILN CONTROL START ===");

    if let Err(e) = run() {
        error!("kiln controller stopped: {}", e);
        eprintln!("Fatal: {}", e);
        std::process::exit(1);
    }
    info!("=== KILN CONTROL FINISHED ===");
}

fn run() -> Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = if Path::new(&config_path).is_file() {
        info!("Loading configuration from {}", config_path);
        KilnConfig::load(&config_path)?
    } else {
        info!("No {} found, using defaults", config_path);
        KilnConfig::default()
    };

    let clock = ScaledClock::new(config.control.time_scale);
    let kiln = SimulatedKiln::new(KilnModel::default(), clock.clone(), SIM_SEED);
    println!(
        "Simulated kiln at {:.1}°C, time scale x{}",
        kiln.temperature(),
        clock.scale()
    );

    let (control_link, supervisor_link) = link(&config.link);
    let latest: SharedStatus = Arc::new(RwLock::new(None));
    let client = KilnClient::new(supervisor_link.commands, latest.clone(), config.clone());

    let mut controller = Controller::new(config.clone())?;
    if config.recovery.enabled {
        try_recover(&config, &client, &mut controller, clock.epoch());
    }

    let run_log = match RunLogWriter::open(&config.logging.run_log_path) {
        Ok(w) => Some(w),
        Err(e) => {
            warn!("Run log disabled: {}", e);
            None
        }
    };

    // Control core: moved onto its own pinned, max-priority thread
    let hardware = ControlHardware::new(kiln.sensor(), kiln.heater());
    let control = ControlCore::new(controller, hardware, control_link, clock.clone(), config.control.clone())
        .spawn()?;

    // Supervisory core: single-threaded runtime for the status pump
    let pump = StatusPump::new(supervisor_link.status, latest, run_log, STATUS_PUMP_PERIOD);
    let supervisor_core = config.control.supervisor_core;
    let supervisor = thread::Builder::new()
        .name("kiln-supervisor".to_string())
        .spawn(move || -> Result<()> {
            let core_ids = core_affinity::get_core_ids().unwrap_or_default();
            if let Some(core_id) = core_ids.get(supervisor_core) {
                if core_affinity::set_for_current(*core_id) {
                    info!("Supervisor pinned to core {}", supervisor_core);
                } else {
                    error!("Failed to pin supervisor to core {}", supervisor_core);
                }
            }
            let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
            let stats = runtime.block_on(pump.run())?;
            info!("Status pump: {:?}", stats);
            Ok(())
        })?;

    menu_loop(&client, &clock);

    if let Err(e) = client.shutdown() {
        warn!("Shutdown command not delivered ({}), closing the link instead", e);
    }
    drop(client);

    match control.join() {
        Ok(stats) => println!(
            "Control core: {} ticks, {} deadline misses, {} snapshots dropped",
            stats.ticks, stats.deadline_misses, stats.status_dropped
        ),
        Err(_) => error!("control thread panicked"),
    }
    match supervisor.join() {
        Ok(result) => result?,
        Err(_) => error!("supervisor thread panicked"),
    }
    Ok(())
}

/// Resume the firing recorded in the run log, if the last row calls for it.
fn try_recover(config: &KilnConfig, client: &KilnClient, controller: &mut Controller, now_epoch: f64) {
    let path = Path::new(&config.logging.run_log_path);
    if !path.is_file() {
        return;
    }
    let records = match read_records(path) {
        Ok(r) => r,
        Err(e) => {
            warn!("Recovery skipped, run log unreadable: {}", e);
            return;
        }
    };
    let Some(plan) = plan_from_records(&records, now_epoch, config.recovery.max_age_s) else {
        return;
    };
    match client.find_profile(&plan.profile_name) {
        Ok(profile) => {
            println!(
                "Resuming '{}' at step {} after an interrupted run",
                plan.profile_name, plan.step_index
            );
            controller.begin_recovery(plan, profile);
        }
        Err(e) => warn!("Recovery of '{}' abandoned: {}", plan.profile_name, e),
    }
}

// ============================================================================
// Interactive menu
// ============================================================================

fn menu_loop(client: &KilnClient, clock: &ScaledClock) {
    loop {
        let choice = prompt_menu();
        let outcome = match choice.as_str() {
            "1" => prompt_profile(client).and_then(|p| client.run_profile(p)),
            "2" => {
                let mode = prompt_line("Tuning mode [safe/standard/thorough/high_temp] (default: safe): ");
                let mode = if mode.is_empty() { Ok(TuningMode::Safe) } else { mode.parse() };
                mode.and_then(|m| client.start_tuning(m))
            }
            "3" => prompt_profile(client).and_then(|p| {
                let delay = prompt_line("Start in how many minutes? [default: 60]: ")
                    .parse::<f64>()
                    .unwrap_or(60.0);
                let now = clock.epoch().floor() as i64;
                client.schedule(p, now + (delay * 60.0).round() as i64, now)
            }),
            "4" => client.cancel_scheduled(),
            "5" => client.stop(),
            "6" | "" => {
                print_status(client.status().as_ref());
                Ok(())
            }
            "7" => {
                println!("Exiting. Heating output will be switched off.");
                return;
            }
            other => {
                println!("Unrecognized option '{}', please try again.", other);
                Ok(())
            }
        };
        match outcome {
            Ok(()) => {}
            Err(e) if e.is_retryable() => println!("Busy: {} (try again)", e),
            Err(e) => println!("Rejected: {}", e),
        }
    }
}

fn prompt_menu() -> String {
    println!("\n┌─────────────────────────────────────────────┐");
    println!("│     KILN CONTROL                            │");
    println!("├─────────────────────────────────────────────┤");
    println!("│  1) Run profile file                        │");
    println!("│  2) Auto-tune                               │");
    println!("│  3) Schedule profile                        │");
    println!("│  4) Cancel scheduled profile                │");
    println!("│  5) Stop                                    │");
    println!("│  6) Status                                  │");
    println!("│  7) Exit                                    │");
    println!("└─────────────────────────────────────────────┘");
    prompt_line("Select [1-7] (default: 6): ")
}

fn prompt_line(question: &str) -> String {
    print!("{}", question);
    let _ = stdout().flush();
    let mut input = String::new();
    let _ = stdin().read_line(&mut input);
    input.trim().to_string()
}

fn prompt_profile(client: &KilnClient) -> Result<Profile> {
    let answer = prompt_line("Profile file or name: ");
    if Path::new(&answer).is_file() {
        client.load_profile(&answer)
    } else {
        client.find_profile(&answer)
    }
}

fn print_status(status: Option<&StatusSnapshot>) {
    let Some(s) = status else {
        println!("No status received yet.");
        return;
    };
    let fmt_temp = |t: Option<f64>| t.map_or("--".to_string(), |t| format!("{:.1}°C", t));
    println!(
        "#{} {} | temp {} | target {} | output {:.0}%",
        s.seq,
        s.state.as_str(),
        fmt_temp(s.current_temp),
        fmt_temp(s.target_temp),
        s.output_percent
    );
    if let Some(p) = &s.profile {
        println!(
            "  '{}' step {}/{}: {} | {:.1}% | rate {} (actual {})",
            p.profile_name,
            p.step_index + 1,
            p.total_steps,
            p.step_name,
            p.progress_percent,
            p.current_rate.map_or("full".to_string(), |r| format!("{:.0}°C/h", r)),
            p.actual_rate.map_or("--".to_string(), |r| format!("{:.0}°C/h", r)),
        );
    }
    if let Some(t) = &s.tuning {
        println!(
            "  tuning {} phase {}/{}: {} | {:.0}%",
            t.mode,
            t.phase_index + 1,
            t.total_phases,
            t.phase_name,
            t.progress_percent
        );
    }
    if let Some(sched) = &s.scheduled {
        println!("  scheduled '{}' in {}", sched.profile_name, format_eta(sched.seconds_until_start));
    }
    if let Some(t) = &s.last_tuning {
        println!(
            "  last tuning: {:?} ({:.0}%), {:?} → kp {:.3} ki {:.5} kd {:.2}",
            t.grade, t.score, t.recommended_method, t.gains.kp, t.gains.ki, t.gains.kd
        );
    }
    if let Some(e) = &s.error {
        println!("  ERROR: {}", e);
    }
    if let Some(e) = &s.last_command_error {
        println!("  last command rejected: {}", e);
    }
}

fn format_eta(seconds: i64) -> String {
    let (h, m, s) = (seconds / 3_600, (seconds % 3_600) / 60, seconds % 60);
    if h > 0 { format!("{}h{:02}m", h, m) } else { format!("{}m{:02}s", m, s) }
}
