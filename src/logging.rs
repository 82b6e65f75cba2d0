//! JSONL run logger.
//!
//! Every optimization run appends structured events to
//! `{output_dir}/logs/run-{ISO8601}.jsonl`, one JSON object per line, so a run
//! can be audited or replayed after the fact. Writes use synchronous
//! `std::fs`: they are small, buffered, and flushed after each event.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;

use crate::archive::CandidateId;
use crate::bandit::Selection;
use crate::experiment::ErrorState;

/// Current UTC time as an ISO 8601 string with milliseconds.
pub fn now_iso() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// A structured run event, tagged with `event_type`.
#[derive(Debug, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum RunEvent {
    RunStart {
        timestamp: String,
        run_id: String,
        model: String,
        seed: u64,
        start_iteration: u64,
    },

    /// The growth draw succeeded and a candidate was minted.
    Growth {
        timestamp: String,
        iteration: u64,
        probability: f64,
        candidate_id: CandidateId,
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        parent: Option<CandidateId>,
    },

    /// The growth draw succeeded but the generator failed.
    GrowthSkipped {
        timestamp: String,
        iteration: u64,
        probability: f64,
        error: String,
    },

    WarmupRound {
        timestamp: String,
        iteration: u64,
        candidate_id: CandidateId,
        round: u32,
        calibration: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    Admitted {
        timestamp: String,
        iteration: u64,
        candidate_id: CandidateId,
        rounds: u32,
    },

    Discarded {
        timestamp: String,
        iteration: u64,
        candidate_id: CandidateId,
        rounds: u32,
        reason: String,
    },

    Selection {
        timestamp: String,
        iteration: u64,
        selected: Vec<Selection>,
    },

    InstanceOutcome {
        timestamp: String,
        iteration: u64,
        instance_id: String,
        resolved: bool,
        cost: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<ErrorState>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    Observation {
        timestamp: String,
        iteration: u64,
        instance_id: String,
        candidate_id: CandidateId,
        score: f64,
        rationale: String,
    },

    MissingObservation {
        timestamp: String,
        iteration: u64,
        instance_id: String,
        candidate_id: CandidateId,
        reason: String,
    },

    IterationEnd {
        timestamp: String,
        iteration: u64,
        archive_size: usize,
        active_count: usize,
        total_pulls: u64,
        instances: usize,
        resolved: usize,
        cost: f64,
    },

    RunEnd {
        timestamp: String,
        iterations_run: u64,
        reason: String,
    },
}

/// Append-only JSONL logger for optimization runs.
pub struct RunLogger {
    writer: BufWriter<fs::File>,
    log_path: PathBuf,
}

impl RunLogger {
    /// Create `{output_dir}/logs/` if needed and open a fresh run file. The
    /// timestamp uses dashes instead of colons for filesystem safety.
    pub fn new(output_dir: &Path) -> anyhow::Result<Self> {
        let log_dir = output_dir.join("logs");
        fs::create_dir_all(&log_dir)?;

        let stamp = Utc::now().format("%Y-%m-%dT%H-%M-%S").to_string();
        let log_path = log_dir.join(format!("run-{stamp}.jsonl"));

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        Ok(Self {
            writer: BufWriter::new(file),
            log_path,
        })
    }

    /// Serialize an event as a single JSON line and flush.
    pub fn log_event(&mut self, event: &RunEvent) -> anyhow::Result<()> {
        serde_json::to_writer(&mut self.writer, event)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufRead;
    use tempfile::TempDir;

    fn read_lines(path: &Path) -> Vec<serde_json::Value> {
        let file = fs::File::open(path).expect("open log");
        std::io::BufReader::new(file)
            .lines()
            .map(|l| serde_json::from_str(&l.expect("read line")).expect("valid JSON"))
            .collect()
    }

    #[test]
    fn creates_log_file_under_output_dir() {
        let tmp = TempDir::new().expect("tempdir");
        let logger = RunLogger::new(tmp.path()).expect("RunLogger::new");

        let path = logger.log_path();
        assert!(path.exists());
        assert!(path.starts_with(tmp.path().join("logs")));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("run-") && name.ends_with(".jsonl"));
    }

    #[test]
    fn events_are_tagged_snake_case_lines() {
        let tmp = TempDir::new().expect("tempdir");
        let mut logger = RunLogger::new(tmp.path()).unwrap();

        logger
            .log_event(&RunEvent::GrowthSkipped {
                timestamp: now_iso(),
                iteration: 3,
                probability: 0.5,
                error: "malformed".into(),
            })
            .unwrap();
        logger
            .log_event(&RunEvent::MissingObservation {
                timestamp: now_iso(),
                iteration: 3,
                instance_id: "inst-1".into(),
                candidate_id: CandidateId(4),
                reason: "judge offline".into(),
            })
            .unwrap();

        let lines = read_lines(logger.log_path());
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event_type"], "growth_skipped");
        assert_eq!(lines[0]["iteration"], 3);
        assert_eq!(lines[1]["event_type"], "missing_observation");
        assert_eq!(lines[1]["candidate_id"], 4);
        assert!(lines[1]["timestamp"].is_string());
    }

    #[test]
    fn optional_fields_are_omitted() {
        let tmp = TempDir::new().expect("tempdir");
        let mut logger = RunLogger::new(tmp.path()).unwrap();

        logger
            .log_event(&RunEvent::InstanceOutcome {
                timestamp: now_iso(),
                iteration: 1,
                instance_id: "ok".into(),
                resolved: true,
                cost: 0.1,
                error: None,
                message: None,
            })
            .unwrap();
        logger
            .log_event(&RunEvent::InstanceOutcome {
                timestamp: now_iso(),
                iteration: 1,
                instance_id: "slow".into(),
                resolved: false,
                cost: 0.0,
                error: Some(ErrorState::Timeout),
                message: Some("Instance timed out after 5s".into()),
            })
            .unwrap();

        let lines = read_lines(logger.log_path());
        assert!(lines[0].get("error").is_none());
        assert_eq!(lines[1]["error"], "timeout");
    }
}
