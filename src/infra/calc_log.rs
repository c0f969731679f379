//! Append-only on-disk log of completed calculations.
//!
//! The engine does not need this for correctness; the surrounding system
//! keeps it for analytics ("calculations today", auditing a displayed price).
//! One JSON document per line, tolerant of unreadable lines on load.

use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::PathBuf,
};

use serde::{Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::warn;
use uuid::Uuid;

use crate::domain::{CalculationResult, CarQuery};

const LOG_FILENAME: &str = "calculations.jsonl";

/// One logged calculation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: Uuid,
    /// RFC 3339 UTC timestamp of when the calculation completed.
    pub recorded_at: String,
    pub query: CarQuery,
    pub result: CalculationResult,
}

#[derive(Debug, thiserror::Error)]
pub enum CalcLogError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    #[error("timestamp formatting failed: {0}")]
    Timestamp(#[from] time::error::Format),
}

/// Handle to the calculation log file.
pub struct CalculationLog {
    path: PathBuf,
}

impl CalculationLog {
    /// Log in the platform data directory, or `None` when no such directory
    /// exists on this system.
    pub fn open_default() -> Option<Self> {
        let base = dirs::data_local_dir()?.join("car-value-estimator");
        Some(Self::at(base.join(LOG_FILENAME)))
    }

    /// Log at an explicit path. The parent directory is created on first
    /// append.
    pub fn at(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Append one calculation.
    pub fn append(&self, query: &CarQuery, result: &CalculationResult) -> Result<LogEntry, CalcLogError> {
        let entry = LogEntry {
            id: Uuid::new_v4(),
            recorded_at: OffsetDateTime::now_utc().format(&Rfc3339)?,
            query: query.clone(),
            result: result.clone(),
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(&entry)?;
        writeln!(file, "{line}")?;
        Ok(entry)
    }

    /// All readable entries, oldest first. Unparsable lines are skipped with
    /// a warning rather than poisoning the whole log.
    pub fn entries(&self) -> Vec<LogEntry> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Vec::new(),
            Err(error) => {
                warn!(path = %self.path.display(), %error, "failed to read calculation log");
                return Vec::new();
            }
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(entry) => Some(entry),
                Err(error) => {
                    warn!(%error, "skipping unreadable calculation log line");
                    None
                }
            })
            .collect()
    }

    /// Number of calculations recorded on the current UTC day.
    pub fn today_count(&self) -> usize {
        let today = OffsetDateTime::now_utc().date();
        self.entries()
            .iter()
            .filter(|entry| {
                OffsetDateTime::parse(&entry.recorded_at, &Rfc3339)
                    .map(|ts| ts.date() == today)
                    .unwrap_or(false)
            })
            .count()
    }
}
