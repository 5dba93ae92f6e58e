//! recovery.rs
//! Rebuilds an interrupted run from the run log after an unplanned restart.
//!
//! The newest row whose state is not `RECOVERY` decides. A plan exists only when
//! that row was `RUNNING`, names a profile and step, and is not older than `max_age_s`.

use log::{info, warn};

use crate::link::messages::StateLabel;
use crate::utils::run_log::LogRecord;

#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryPlan {
    pub profile_name: String,
    pub step_index: usize,
    /// Live (possibly adapted) ramp rate at the time of the row
    pub current_rate: Option<f64>,
    pub elapsed_seconds: f64,
    pub last_temp: Option<f64>,
    pub recorded_at: f64,
}

pub fn plan_from_records(records: &[LogRecord], now_epoch: f64, max_age_s: i64) -> Option<RecoveryPlan> {
    let last = records.iter().rev().find(|r| r.state != StateLabel::Recovery)?;

    if last.state != StateLabel::Running {
        info!("[Recovery] last run state was {}, nothing to resume", last.state.as_str());
        return None;
    }
    let age = now_epoch - last.timestamp;
    if age > max_age_s as f64 {
        warn!(
            "[Recovery] last RUNNING row is {:.0}s old (limit {}s), not resuming",
            age, max_age_s
        );
        return None;
    }
    if last.profile_name.is_empty() {
        warn!("[Recovery] last RUNNING row names no profile");
        return None;
    }
    let step_index = last.step_index?;

    Some(RecoveryPlan {
        profile_name: last.profile_name.clone(),
        step_index,
        current_rate: last.current_rate,
        elapsed_seconds: last.elapsed_seconds,
        last_temp: last.current_temp,
        recorded_at: last.timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(timestamp: f64, state: StateLabel, step_index: Option<usize>) -> LogRecord {
        LogRecord {
            timestamp,
            elapsed_seconds: 3_000.0,
            current_temp: Some(450.0),
            target_temp: Some(455.0),
            output_percent: 60.0,
            state,
            progress_percent: 40.0,
            step_name: "ramp to 600°C @ 100°C/h".into(),
            step_index,
            total_steps: Some(2),
            current_rate: Some(90.0),
            profile_name: "bisque".into(),
        }
    }

    #[test]
    fn resumes_latest_running_row_skipping_recovery_rows() {
        let rows = vec![
            row(1_000.0, StateLabel::Running, Some(0)),
            row(1_010.0, StateLabel::Running, Some(1)),
            row(1_020.0, StateLabel::Recovery, None),
        ];
        let plan = plan_from_records(&rows, 1_100.0, 900).unwrap();
        assert_eq!(plan.profile_name, "bisque");
        assert_eq!(plan.step_index, 1);
        assert_eq!(plan.current_rate, Some(90.0));
        assert_eq!(plan.elapsed_seconds, 3_000.0);
        assert_eq!(plan.recorded_at, 1_010.0);
    }

    #[test]
    fn no_plan_for_finished_stale_or_empty_logs() {
        assert!(plan_from_records(&[], 0.0, 900).is_none());

        let idle = vec![row(1_000.0, StateLabel::Running, Some(0)), row(1_010.0, StateLabel::Idle, None)];
        assert!(plan_from_records(&idle, 1_020.0, 900).is_none());

        let stale = vec![row(1_000.0, StateLabel::Running, Some(0))];
        assert!(plan_from_records(&stale, 2_000.0, 900).is_none());

        let mut unnamed = row(1_000.0, StateLabel::Running, Some(0));
        unnamed.profile_name.clear();
        assert!(plan_from_records(&[unnamed], 1_001.0, 900).is_none());
    }
}
