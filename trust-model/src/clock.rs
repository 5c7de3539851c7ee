use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol used to obtain the reference time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeProtocol {
    Ntp,
    Tsp,
    /// `Date` header of an HTTP(S) response
    Http,
}

impl fmt::Display for TimeProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeProtocol::Ntp => f.write_str("NTP"),
            TimeProtocol::Tsp => f.write_str("TSP"),
            TimeProtocol::Http => f.write_str("HTTP"),
        }
    }
}

/// Clock drift detection settings and the last measured offset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockDriftConfig {
    pub protocol: TimeProtocol,
    pub server: String,
    pub timeout_millis: u64,
    pub max_clock_offset_millis: i64,
    pub cron: String,
    pub enabled: bool,
    /// Reference time minus local time
    #[serde(default)]
    pub offset_millis: i64,
}

impl ClockDriftConfig {
    pub fn is_within_tolerance(&self) -> bool {
        self.offset_millis.unsigned_abs() <= self.max_clock_offset_millis.unsigned_abs()
    }
}
