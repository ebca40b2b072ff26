//! Signal observation and transition types
//!
//! A [`Snapshot`] is one timestamped observation of a monitored signal,
//! produced by an external probe. The detector classifies snapshots into
//! [`TransitionEvent`]s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Observed value of a signal
///
/// Closed set of value shapes. On the wire the variant is inferred from the
/// JSON type: numbers are `Numeric`, booleans `Boolean`, strings `Categorical`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalValue {
    Numeric(f64),
    Boolean(bool),
    Categorical(String),
}

impl SignalValue {
    /// Numeric value, if this is a numeric observation
    pub fn as_numeric(&self) -> Option<f64> {
        match self {
            SignalValue::Numeric(v) => Some(*v),
            _ => None,
        }
    }

    /// Categorical form used for change detection and watch sets
    ///
    /// Booleans map to `"true"`/`"false"`. Numeric values have no
    /// categorical form.
    pub fn as_category(&self) -> Option<String> {
        match self {
            SignalValue::Numeric(_) => None,
            SignalValue::Boolean(b) => Some(b.to_string()),
            SignalValue::Categorical(s) => Some(s.clone()),
        }
    }
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalValue::Numeric(v) => write!(f, "{}", v),
            SignalValue::Boolean(b) => write!(f, "{}", b),
            SignalValue::Categorical(s) => f.write_str(s),
        }
    }
}

/// Timestamped observation of one monitored key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Monitored key, e.g. `disk:/:usage`
    pub key: String,
    pub value: SignalValue,
    /// Observation time (defaults to receipt time when omitted on the wire)
    #[serde(default = "crate::time::now")]
    pub timestamp: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(key: impl Into<String>, value: SignalValue, timestamp: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            value,
            timestamp,
        }
    }

    /// Numeric snapshot stamped with the current time
    pub fn numeric(key: impl Into<String>, value: f64) -> Self {
        Self::new(key, SignalValue::Numeric(value), crate::time::now())
    }

    /// Boolean snapshot stamped with the current time
    pub fn boolean(key: impl Into<String>, value: bool) -> Self {
        Self::new(key, SignalValue::Boolean(value), crate::time::now())
    }

    /// Categorical snapshot stamped with the current time
    pub fn categorical(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(key, SignalValue::Categorical(value.into()), crate::time::now())
    }
}

/// Severity tier of a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Warning,
    Critical,
    /// Categorical or boolean value changed
    Change,
    /// Sustained monotonic increase (leak/trend)
    Leak,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Warning, Tier::Critical, Tier::Change, Tier::Leak];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Warning => "warning",
            Tier::Critical => "critical",
            Tier::Change => "change",
            Tier::Leak => "leak",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Crossed a threshold upwards, or trending upwards
    Rising,
    /// Categorical value changed
    Changed,
}

/// A detected, alert-worthy change in a signal's classified state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub key: String,
    pub tier: Tier,
    pub direction: Direction,
    /// Value that triggered the transition
    pub value: SignalValue,
    /// Previous categorical value, for `Change` transitions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<SignalValue>,
    pub timestamp: DateTime<Utc>,
}
