//! Per-round, per-worker timing derivation and the CSV round log.

use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
};

use comms::msg::{Metrics, metric};
use log::warn;

use crate::state::WorkerId;

const HEADER: &str = "current_round,client_id,round_time,server_to_client_time,computing_time,client_to_server_time";

/// Times derived from the four timestamps of one work result.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingRecord {
    pub round: u32,
    pub worker_id: WorkerId,
    pub round_time: f64,
    pub server_to_client_time: f64,
    pub compute_time: f64,
    pub client_to_server_time: f64,
}

impl TimingRecord {
    /// Derives the record from a result's metrics.
    ///
    /// # Returns
    /// `None` if any of the four timestamps is missing.
    pub fn from_metrics(round: u32, worker_id: &str, metrics: &Metrics) -> Option<Self> {
        let round_start = metrics.get(metric::ROUND_START_TIME)?;
        let compute_start = metrics.get(metric::COMPUTE_START_TIME)?;
        let compute_finish = metrics.get(metric::COMPUTE_FINISH_TIME)?;
        let round_finish = metrics.get(metric::ROUND_FINISH_TIME)?;

        Some(Self {
            round,
            worker_id: worker_id.to_string(),
            round_time: round_finish - round_start,
            server_to_client_time: compute_start - round_start,
            compute_time: compute_finish - compute_start,
            client_to_server_time: round_finish - compute_finish,
        })
    }

    fn row(&self) -> String {
        format!(
            "{},{},{},{},{},{}",
            self.round,
            self.worker_id,
            self.round_time,
            self.server_to_client_time,
            self.compute_time,
            self.client_to_server_time
        )
    }
}

/// The structured round-timing log, one CSV row per worker per round.
pub struct TimingLog {
    out: Option<Box<dyn Write + Send>>,
}

impl TimingLog {
    /// A log that discards every row.
    pub fn disabled() -> Self {
        Self { out: None }
    }

    /// Creates (truncates) the log file and writes the header row.
    ///
    /// # Errors
    /// Returns `io::Error` if the file cannot be created; fatal at
    /// startup, unlike append failures later on.
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = BufWriter::new(File::create(path)?);
        Self::from_writer(Box::new(file))
    }

    /// Wraps an arbitrary writer; used by tests.
    pub fn from_writer(mut out: Box<dyn Write + Send>) -> io::Result<Self> {
        writeln!(out, "{HEADER}")?;
        Ok(Self { out: Some(out) })
    }

    /// Appends one row. A failed write is logged and swallowed.
    pub fn append(&mut self, record: &TimingRecord) {
        let Some(out) = &mut self.out else { return };

        if let Err(e) = writeln!(out, "{}", record.row()).and_then(|()| out.flush()) {
            warn!("timing log write failed: {e}");
        }
    }
}
