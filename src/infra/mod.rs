//! Collaborators with the outside world: the statistics service client and
//! the on-disk calculation log.

pub mod calc_log;
pub mod stats_api;

pub use calc_log::{CalcLogError, CalculationLog, LogEntry};
pub use stats_api::{StatsApiError, StatsClient};
