//! Offline thermal fit (fit_tuning binary).
//!
//! Re-runs the auto-tune analysis on the last tuning session recorded in a run log,
//! e.g. after changing the fit parameters in the config, and prints the result as JSON.
//!
//! Usage: `fit_tuning [run_log.csv] [mode]`
//! The mode is inferred from the recorded phase labels when not given.

use log::{info, warn};

use kiln_control::{
    KilnConfig, KilnError, Result,
    control_core::{
        thermal_fit,
        tuner::{PhaseRecord, PhasePlan, PlateauDetector, TuningMode, TuningSample},
    },
    link::messages::StateLabel,
    utils::run_log::{LogRecord, read_records},
};

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        eprintln!("fit_tuning: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let config = KilnConfig::default();
    let mut args = std::env::args().skip(1);
    let path = args.next().unwrap_or_else(|| config.logging.run_log_path.clone());
    let mode_arg: Option<TuningMode> = args.next().map(|m| m.parse()).transpose()?;

    let records = read_records(&path)?;
    let session = last_tuning_session(&records);
    if session.is_empty() {
        return Err(KilnError::InsufficientData(format!("no TUNING rows in {}", path)));
    }
    info!("Fitting {} rows from {}", session.len(), path);

    let samples: Vec<TuningSample> = session
        .iter()
        .filter_map(|r| {
            Some(TuningSample {
                elapsed: r.elapsed_seconds,
                temp: r.current_temp?,
                ssr_percent: r.output_percent,
            })
        })
        .collect();
    let phases = rebuild_phases(session, &config);
    let mode = match mode_arg {
        Some(m) => m,
        None => infer_mode(&phases)?,
    };
    let ambient = samples.first().map_or(25.0, |s| s.temp);

    let result = thermal_fit::analyze(mode, &samples, &phases, ambient, &config.tuning)?;
    println!("{}", result.to_json()?);
    Ok(())
}

/// Newest contiguous run of TUNING rows.
fn last_tuning_session(records: &[LogRecord]) -> &[LogRecord] {
    let Some(end) = records.iter().rposition(|r| r.state == StateLabel::Tuning) else {
        return &[];
    };
    let start = records[..end]
        .iter()
        .rposition(|r| r.state != StateLabel::Tuning)
        .map_or(0, |i| i + 1);
    &records[start..=end]
}

/// One record per phase index, with plateaus re-detected from the samples.
fn rebuild_phases(session: &[LogRecord], config: &KilnConfig) -> Vec<PhaseRecord> {
    session
        .chunk_by(|a, b| a.step_index == b.step_index)
        .filter_map(|rows| {
            let first = rows.first()?;
            let last = rows.last()?;
            let Some(plan) = PhasePlan::from_label(&first.step_name) else {
                warn!("Unrecognised phase label '{}', skipped", first.step_name);
                return None;
            };

            let mut detector = PlateauDetector::from_config(&config.tuning);
            let plateau = rows
                .iter()
                .filter_map(|r| Some((r.elapsed_seconds, r.current_temp?)))
                .fold(false, |_, (t, temp)| detector.observe(t, temp));

            Some(PhaseRecord {
                plan,
                start_elapsed: first.elapsed_seconds,
                end_elapsed: last.elapsed_seconds,
                start_temp: first.current_temp?,
                end_temp: last.current_temp?,
                plateau_temp: if plateau { detector.mean() } else { None },
            })
        })
        .collect()
}

fn infer_mode(phases: &[PhaseRecord]) -> Result<TuningMode> {
    let heats: Vec<PhasePlan> = phases.iter().map(|p| p.plan).filter(|p| p.power > 0.0).collect();
    [TuningMode::Safe, TuningMode::Standard, TuningMode::Thorough, TuningMode::HighTemp]
        .into_iter()
        .find(|mode| {
            let plan: Vec<PhasePlan> = mode.plan().into_iter().filter(|p| p.power > 0.0).collect();
            // A ceiling jump can cut the recorded list short
            !heats.is_empty() && plan.starts_with(&heats)
        })
        .ok_or_else(|| KilnError::InsufficientData("cannot infer the tuning mode; pass it explicitly".into()))
}
