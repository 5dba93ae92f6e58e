//! status_pump.rs
//! Cooperative supervisory loop: drains status snapshots, keeps the latest one
//! for the client, appends a run-log row per snapshot.
//!
//! Runs on a tokio interval with `MissedTickBehavior::Skip`; a slow disk only
//! delays this loop, never the control core (the ring overwrites instead).

use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::time::{self, MissedTickBehavior};

use crate::error::Result;
use crate::link::channel::StatusReceiver;
use crate::link::messages::StatusSnapshot;
use crate::supervisor_core::client::SharedStatus;
use crate::utils::run_log::{LogRecord, RunLogWriter};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PumpStats {
    pub snapshots: u64,
    /// Sequence gaps seen on this side (ring overwrites)
    pub gaps: u64,
    pub rows_logged: u64,
    pub log_failures: u64,
}

pub struct StatusPump {
    receiver: StatusReceiver,
    latest: SharedStatus,
    log: Option<RunLogWriter>,
    period: Duration,
    last_seq: Option<u64>,
    stats: PumpStats,
}

impl StatusPump {
    pub fn new(receiver: StatusReceiver, latest: SharedStatus, log: Option<RunLogWriter>, period: Duration) -> Self {
        Self {
            receiver,
            latest,
            log,
            period,
            last_seq: None,
            stats: PumpStats::default(),
        }
    }

    pub fn stats(&self) -> &PumpStats {
        &self.stats
    }

    /// Drain everything buffered now. Returns how many snapshots were taken.
    pub fn pump_once(&mut self) -> usize {
        let batch = self.receiver.drain();
        let count = batch.len();
        for snapshot in batch {
            self.accept(snapshot);
        }
        count
    }

    fn accept(&mut self, snapshot: StatusSnapshot) {
        self.stats.snapshots += 1;
        if let Some(last) = self.last_seq {
            if snapshot.seq > last + 1 {
                self.stats.gaps += snapshot.seq - last - 1;
                debug!("[StatusPump] missed {} snapshots before #{}", snapshot.seq - last - 1, snapshot.seq);
            }
        }
        self.last_seq = Some(snapshot.seq);

        if let Some(log) = self.log.as_mut() {
            match log.append(&LogRecord::from_snapshot(&snapshot)) {
                Ok(()) => self.stats.rows_logged += 1,
                Err(e) => {
                    self.stats.log_failures += 1;
                    error!("[StatusPump] run log append failed: {}", e);
                }
            }
        }
        if let Some(reason) = &snapshot.error {
            let was_error = self.latest.read().as_ref().is_some_and(|s| s.error.is_some());
            if !was_error {
                warn!("[StatusPump] controller reported error: {}", reason);
            }
        }
        *self.latest.write() = Some(snapshot);
    }

    /// Pump until the control core has gone and its last snapshots are drained.
    pub async fn run(mut self) -> Result<PumpStats> {
        let mut interval = time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("[StatusPump] started, period {:?}", self.period);

        loop {
            interval.tick().await;
            let alive = self.receiver.is_control_alive();
            self.pump_once();
            if !alive {
                // One last sweep for anything published before the handle dropped
                self.pump_once();
                break;
            }
        }

        info!(
            "[StatusPump] stopped: {} snapshots, {} rows, {} gaps",
            self.stats.snapshots, self.stats.rows_logged, self.stats.gaps
        );
        Ok(self.stats)
    }
}
