//! Timestamp utilities and local time-of-day windows

use chrono::{DateTime, Local, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Get current local time of day
///
/// Used for adaptive pool selection and `within` chain step conditions.
pub fn local_time_of_day() -> NaiveTime {
    Local::now().time()
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}

/// A time-of-day window, e.g. `08:00`-`22:00`
///
/// Windows whose end is before their start wrap past midnight
/// (`22:00`-`06:00` contains `23:30` and `05:00`). The start is inclusive,
/// the end exclusive. A window with equal start and end covers the whole day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    #[serde(serialize_with = "serialize_hm", deserialize_with = "deserialize_hm")]
    pub start: NaiveTime,
    #[serde(serialize_with = "serialize_hm", deserialize_with = "deserialize_hm")]
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Check whether `time` falls inside the window
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start == self.end {
            true
        } else if self.start < self.end {
            time >= self.start && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start.format("%H:%M"), self.end.format("%H:%M"))
    }
}

/// Parse `HH:MM` or `HH:MM:SS`
pub fn parse_time_of_day(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .ok()
}

fn serialize_hm<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&time.format("%H:%M:%S").to_string())
}

fn deserialize_hm<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse_time_of_day(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid time of day '{}', expected HH:MM", raw)))
}
