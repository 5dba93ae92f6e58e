//! run_log.rs
//! Append-only CSV run log, one row per status snapshot.
//!
//! The row schema is the recovery contract: the newest non-`RECOVERY` row alone
//! identifies the active profile, step, adapted rate and elapsed time.

use std::{
    fs::{File, OpenOptions, create_dir_all},
    io::BufWriter,
    path::{Path, PathBuf},
};

use csv::{ReaderBuilder, Writer, WriterBuilder};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::link::messages::{StateLabel, StatusSnapshot};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Epoch seconds
    pub timestamp: f64,
    pub elapsed_seconds: f64,
    pub current_temp: Option<f64>,
    pub target_temp: Option<f64>,
    pub output_percent: f64,
    pub state: StateLabel,
    pub progress_percent: f64,
    pub step_name: String,
    pub step_index: Option<usize>,
    pub total_steps: Option<usize>,
    pub current_rate: Option<f64>,
    pub profile_name: String,
}

impl LogRecord {
    pub fn from_snapshot(s: &StatusSnapshot) -> Self {
        let mut record = LogRecord {
            timestamp: s.timestamp,
            elapsed_seconds: 0.0,
            current_temp: s.current_temp,
            target_temp: s.target_temp,
            output_percent: s.output_percent,
            state: s.state,
            progress_percent: 0.0,
            step_name: String::new(),
            step_index: None,
            total_steps: None,
            current_rate: None,
            profile_name: String::new(),
        };

        if let Some(p) = &s.profile {
            record.elapsed_seconds = p.elapsed_seconds;
            record.progress_percent = p.progress_percent;
            record.step_name = p.step_name.clone();
            record.step_index = Some(p.step_index);
            record.total_steps = Some(p.total_steps);
            record.current_rate = p.current_rate;
            record.profile_name = p.profile_name.clone();
        } else if let Some(t) = &s.tuning {
            record.elapsed_seconds = t.elapsed_seconds;
            record.progress_percent = t.progress_percent;
            record.step_name = t.phase_name.clone();
            record.step_index = Some(t.phase_index);
            record.total_steps = Some(t.total_phases);
        }
        record
    }
}

pub struct RunLogWriter {
    writer: Writer<BufWriter<File>>,
    path: PathBuf,
    rows: u64,
}

impl RunLogWriter {
    /// Open for appending; the header is written only to a new or empty file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let is_new = file.metadata()?.len() == 0;
        let writer = WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(BufWriter::new(file));
        info!("[RunLog] appending to {}", path.display());
        Ok(Self { writer, path, rows: 0 })
    }

    /// Each row is flushed so that the newest line survives a power cut.
    pub fn append(&mut self, record: &LogRecord) -> Result<()> {
        self.writer.serialize(record)?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows_written(&self) -> u64 {
        self.rows
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// All rows of a run log, skipping rows that fail to parse (torn last line).
pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<LogRecord>> {
    let mut reader = ReaderBuilder::new().flexible(true).from_path(path.as_ref())?;
    let mut records = Vec::new();
    for row in reader.deserialize::<LogRecord>() {
        match row {
            Ok(r) => records.push(r),
            Err(e) => warn!("[RunLog] skipping unreadable row: {}", e),
        }
    }
    Ok(records)
}
