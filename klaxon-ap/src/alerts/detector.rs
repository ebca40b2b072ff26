//! Transition detection with per-tier hysteresis, change detection and
//! leak (monotonic trend) detection
//!
//! Each monitored key gets its own state entry, created on first observation.
//! The registry lock is only held to look up or insert an entry; evaluation
//! runs under the entry's own lock so unrelated keys never contend.
//!
//! # Numeric tiers
//!
//! ```text
//!              value >= threshold (fires)
//!  Disarmed ─────────────────────────────► Armed
//!     ▲                                      │
//!     └──────────────────────────────────────┘
//!        value < threshold - hysteresis (silent)
//! ```
//!
//! Warning and critical arm independently. When one sample crosses both from
//! disarmed, only the critical transition is emitted and warning arms silently.

use chrono::{DateTime, Utc};
use klaxon_common::config::{MonitorConfig, ThresholdSpec};
use klaxon_common::{Direction, SignalValue, Snapshot, Tier, TransitionEvent};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

use crate::sync::lock;

#[derive(Debug, Default)]
struct NumericState {
    warning_armed: bool,
    critical_armed: bool,
    /// Last N samples for leak detection
    window: VecDeque<f64>,
    leak_fired: bool,
}

#[derive(Debug)]
enum SignalState {
    Numeric(NumericState),
    Categorical { last: Option<String> },
}

#[derive(Debug)]
struct KeyState {
    last_seen: DateTime<Utc>,
    signal: SignalState,
}

/// Classifies snapshots into transition events
pub struct TransitionDetector {
    /// Well-formed monitors in configuration order
    monitors: Vec<MonitorConfig>,
    keys: Mutex<HashMap<String, Arc<Mutex<KeyState>>>>,
}

impl TransitionDetector {
    /// Build a detector from monitor configuration
    ///
    /// Monitors with malformed thresholds are skipped (their keys are never
    /// evaluated).
    pub fn new(monitors: &[MonitorConfig]) -> Self {
        let monitors = monitors
            .iter()
            .filter(|monitor| match monitor.thresholds.check() {
                Ok(()) => true,
                Err(problem) => {
                    warn!(key = %monitor.key, "Ignoring malformed thresholds: {}", problem);
                    false
                }
            })
            .cloned()
            .collect();

        Self {
            monitors,
            keys: Mutex::new(HashMap::new()),
        }
    }

    /// Monitor governing a key: exact key first, then the longest pattern
    ///
    /// Ties go to the monitor listed first. Alert routing uses the same
    /// lookup, so thresholds and routes always come from one monitor.
    pub fn monitor_for(&self, key: &str) -> Option<&MonitorConfig> {
        let mut best: Option<(usize, &MonitorConfig)> = None;
        for monitor in &self.monitors {
            if let Some(rank) = monitor.match_key(key) {
                if best.map_or(true, |(top, _)| rank > top) {
                    best = Some((rank, monitor));
                }
            }
        }
        best.map(|(_, monitor)| monitor)
    }

    /// Threshold spec governing a key, if any
    pub fn spec_for(&self, key: &str) -> Option<&ThresholdSpec> {
        self.monitor_for(key).map(|monitor| &monitor.thresholds)
    }

    /// Evaluate a snapshot against its key's history
    ///
    /// Returns zero, one or two events: at most one threshold transition
    /// (critical wins a simultaneous crossing) plus at most one leak
    /// transition. Never fails; unknown keys and mismatched value shapes
    /// produce no events.
    pub fn evaluate(&self, snapshot: &Snapshot) -> Vec<TransitionEvent> {
        let Some(spec) = self.spec_for(&snapshot.key) else {
            return Vec::new();
        };

        let entry = {
            let mut keys = lock(&self.keys);
            keys.entry(snapshot.key.clone())
                .or_insert_with(|| {
                    debug!(key = %snapshot.key, "Tracking new key");
                    Arc::new(Mutex::new(KeyState {
                        last_seen: snapshot.timestamp,
                        signal: initial_state(spec),
                    }))
                })
                .clone()
        };

        let mut state = lock(&entry);
        if snapshot.timestamp > state.last_seen {
            state.last_seen = snapshot.timestamp;
        }

        match (spec, &mut state.signal) {
            (
                ThresholdSpec::Numeric {
                    warning,
                    critical,
                    hysteresis,
                    leak_window,
                },
                SignalState::Numeric(numeric),
            ) => {
                let Some(value) = snapshot.value.as_numeric().filter(|v| v.is_finite()) else {
                    debug!(key = %snapshot.key, value = %snapshot.value, "Non-numeric value for numeric key, ignored");
                    return Vec::new();
                };
                let mut events =
                    evaluate_thresholds(numeric, *warning, *critical, *hysteresis, value, snapshot);
                if let Some(n) = leak_window {
                    events.extend(evaluate_leak(numeric, *n, value, snapshot));
                }
                events
            }
            (ThresholdSpec::Categorical { watch }, SignalState::Categorical { last }) => {
                let Some(current) = snapshot.value.as_category() else {
                    debug!(key = %snapshot.key, "Numeric value for categorical key, ignored");
                    return Vec::new();
                };
                evaluate_change(last, watch, current, snapshot)
                    .into_iter()
                    .collect()
            }
            _ => Vec::new(),
        }
    }

    /// Forget keys not observed within `max_idle` of `now`
    ///
    /// Returns the number of evicted keys. An evicted key starts over as a
    /// first observation.
    pub fn evict_idle(&self, now: DateTime<Utc>, max_idle: Duration) -> usize {
        let max_idle = chrono::Duration::from_std(max_idle).unwrap_or_else(|_| chrono::Duration::max_value());
        let mut keys = lock(&self.keys);
        let before = keys.len();
        keys.retain(|_, entry| {
            let last_seen = lock(entry).last_seen;
            now.signed_duration_since(last_seen) <= max_idle
        });
        let evicted = before - keys.len();
        if evicted > 0 {
            debug!("Evicted {} idle keys", evicted);
        }
        evicted
    }

    /// Number of keys with retained state
    pub fn tracked_keys(&self) -> usize {
        lock(&self.keys).len()
    }
}

fn initial_state(spec: &ThresholdSpec) -> SignalState {
    match spec {
        ThresholdSpec::Numeric { .. } => SignalState::Numeric(NumericState::default()),
        ThresholdSpec::Categorical { .. } => SignalState::Categorical { last: None },
    }
}

fn transition(snapshot: &Snapshot, tier: Tier, direction: Direction) -> TransitionEvent {
    TransitionEvent {
        key: snapshot.key.clone(),
        tier,
        direction,
        value: snapshot.value.clone(),
        previous: None,
        timestamp: snapshot.timestamp,
    }
}

/// Update one tier's armed bit; returns true when the tier fires
fn step_tier(armed: &mut bool, threshold: f64, hysteresis: f64, value: f64) -> bool {
    if *armed {
        if value < threshold - hysteresis {
            *armed = false;
        }
        false
    } else if value >= threshold {
        *armed = true;
        true
    } else {
        false
    }
}

fn evaluate_thresholds(
    state: &mut NumericState,
    warning: Option<f64>,
    critical: Option<f64>,
    hysteresis: f64,
    value: f64,
    snapshot: &Snapshot,
) -> Vec<TransitionEvent> {
    let critical_fired = critical
        .map(|c| step_tier(&mut state.critical_armed, c, hysteresis, value))
        .unwrap_or(false);
    let warning_fired = warning
        .map(|w| step_tier(&mut state.warning_armed, w, hysteresis, value))
        .unwrap_or(false);

    if critical_fired {
        if warning_fired {
            debug!(key = %snapshot.key, value, "Critical and warning crossed together, warning suppressed");
        }
        vec![transition(snapshot, Tier::Critical, Direction::Rising)]
    } else if warning_fired {
        vec![transition(snapshot, Tier::Warning, Direction::Rising)]
    } else {
        Vec::new()
    }
}

fn evaluate_leak(
    state: &mut NumericState,
    window: usize,
    value: f64,
    snapshot: &Snapshot,
) -> Option<TransitionEvent> {
    if let Some(&last) = state.window.back() {
        if value <= last {
            state.leak_fired = false;
        }
    }
    state.window.push_back(value);
    while state.window.len() > window {
        state.window.pop_front();
    }

    if state.leak_fired || state.window.len() < window {
        return None;
    }
    let increasing = state
        .window
        .iter()
        .zip(state.window.iter().skip(1))
        .all(|(a, b)| b > a);
    if increasing {
        state.leak_fired = true;
        debug!(key = %snapshot.key, window, "Leak detected");
        Some(transition(snapshot, Tier::Leak, Direction::Rising))
    } else {
        None
    }
}

fn evaluate_change(
    last: &mut Option<String>,
    watch: &[String],
    current: String,
    snapshot: &Snapshot,
) -> Option<TransitionEvent> {
    let previous = last.replace(current.clone())?;
    if previous == current {
        return None;
    }
    if !watch.is_empty() && !watch.iter().any(|w| *w == current) {
        debug!(key = %snapshot.key, from = %previous, to = %current, "Change to unwatched value");
        return None;
    }
    let previous = match &snapshot.value {
        SignalValue::Boolean(_) => SignalValue::Boolean(previous == "true"),
        _ => SignalValue::Categorical(previous),
    };
    Some(TransitionEvent {
        previous: Some(previous),
        ..transition(snapshot, Tier::Change, Direction::Changed)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use klaxon_common::config::AlertRoutes;

    fn numeric_monitor(key: &str, warning: Option<f64>, critical: Option<f64>, hysteresis: f64) -> MonitorConfig {
        MonitorConfig {
            key: key.to_string(),
            thresholds: ThresholdSpec::Numeric {
                warning,
                critical,
                hysteresis,
                leak_window: None,
            },
            alerts: AlertRoutes::default(),
        }
    }

    fn leak_monitor(key: &str, window: usize) -> MonitorConfig {
        MonitorConfig {
            key: key.to_string(),
            thresholds: ThresholdSpec::Numeric {
                warning: None,
                critical: None,
                hysteresis: 0.0,
                leak_window: Some(window),
            },
            alerts: AlertRoutes::default(),
        }
    }

    fn categorical_monitor(key: &str, watch: &[&str]) -> MonitorConfig {
        MonitorConfig {
            key: key.to_string(),
            thresholds: ThresholdSpec::Categorical {
                watch: watch.iter().map(|s| s.to_string()).collect(),
            },
            alerts: AlertRoutes::default(),
        }
    }

    fn feed(detector: &TransitionDetector, key: &str, values: &[f64]) -> Vec<(f64, Tier)> {
        values
            .iter()
            .flat_map(|v| {
                detector
                    .evaluate(&Snapshot::numeric(key, *v))
                    .into_iter()
                    .map(move |e| (*v, e.tier))
            })
            .collect()
    }

    #[test]
    fn test_warning_rearms_after_dropping_below_margin() {
        let detector = TransitionDetector::new(&[numeric_monitor("bat", Some(80.0), None, 5.0)]);
        let fired = feed(&detector, "bat", &[70.0, 82.0, 83.0, 78.0, 81.0]);
        // 78 is above 75, so the tier never disarmed
        assert_eq!(fired, vec![(82.0, Tier::Warning)]);

        let detector = TransitionDetector::new(&[numeric_monitor("bat", Some(80.0), None, 5.0)]);
        let fired = feed(&detector, "bat", &[70.0, 82.0, 83.0, 74.0, 81.0]);
        assert_eq!(fired, vec![(82.0, Tier::Warning), (81.0, Tier::Warning)]);
    }

    #[test]
    fn test_no_refire_inside_hysteresis_band() {
        let detector = TransitionDetector::new(&[numeric_monitor("bat", Some(80.0), None, 5.0)]);
        let fired = feed(&detector, "bat", &[70.0, 82.0, 79.0]);
        assert_eq!(fired, vec![(82.0, Tier::Warning)]);
    }

    #[test]
    fn test_disarm_boundary_is_strict() {
        let detector = TransitionDetector::new(&[numeric_monitor("bat", Some(80.0), None, 5.0)]);
        // Exactly threshold - margin does not disarm
        let fired = feed(&detector, "bat", &[80.0, 75.0, 80.0, 74.9, 80.0]);
        assert_eq!(fired, vec![(80.0, Tier::Warning), (80.0, Tier::Warning)]);
    }

    #[test]
    fn test_simultaneous_crossing_emits_only_critical() {
        let detector = TransitionDetector::new(&[numeric_monitor("disk", Some(80.0), Some(95.0), 5.0)]);
        let fired = feed(&detector, "disk", &[50.0, 97.0, 85.0, 96.0]);
        // 85 disarms critical (< 90) but warning stays armed, so 96 is critical only
        assert_eq!(fired, vec![(97.0, Tier::Critical), (96.0, Tier::Critical)]);
    }

    #[test]
    fn test_end_to_end_sequence() {
        let detector = TransitionDetector::new(&[numeric_monitor("disk:/", Some(80.0), Some(95.0), 5.0)]);
        let fired = feed(&detector, "disk:/", &[60.0, 81.0, 96.0, 70.0, 82.0]);
        assert_eq!(
            fired,
            vec![(81.0, Tier::Warning), (96.0, Tier::Critical), (82.0, Tier::Warning)]
        );
    }

    #[test]
    fn test_unknown_key_and_wrong_shape_are_silent() {
        let detector = TransitionDetector::new(&[numeric_monitor("disk", Some(80.0), None, 0.0)]);
        assert!(detector.evaluate(&Snapshot::numeric("other", 99.0)).is_empty());
        assert!(detector.evaluate(&Snapshot::categorical("disk", "full")).is_empty());
        assert!(detector.evaluate(&Snapshot::numeric("disk", f64::NAN)).is_empty());
        assert_eq!(detector.tracked_keys(), 1);
    }

    #[test]
    fn test_malformed_spec_is_never_evaluated() {
        let detector = TransitionDetector::new(&[numeric_monitor("disk", Some(95.0), Some(80.0), 0.0)]);
        assert!(detector.spec_for("disk").is_none());
        assert!(detector.evaluate(&Snapshot::numeric("disk", 99.0)).is_empty());
        assert_eq!(detector.tracked_keys(), 0);
    }

    #[test]
    fn test_categorical_change_detection() {
        let detector = TransitionDetector::new(&[categorical_monitor("ctr", &[])]);
        assert!(detector.evaluate(&Snapshot::categorical("ctr", "healthy")).is_empty());
        assert!(detector.evaluate(&Snapshot::categorical("ctr", "healthy")).is_empty());

        let events = detector.evaluate(&Snapshot::categorical("ctr", "unhealthy"));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].tier, Tier::Change);
        assert_eq!(events[0].direction, Direction::Changed);
        assert_eq!(events[0].previous, Some(SignalValue::Categorical("healthy".into())));

        assert!(detector.evaluate(&Snapshot::categorical("ctr", "unhealthy")).is_empty());
    }

    #[test]
    fn test_watch_set_filters_changes() {
        let detector = TransitionDetector::new(&[categorical_monitor("ac", &["false"])]);
        assert!(detector.evaluate(&Snapshot::boolean("ac", true)).is_empty());
        let events = detector.evaluate(&Snapshot::boolean("ac", false));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].previous, Some(SignalValue::Boolean(true)));
        // Change back to an unwatched value is silent
        assert!(detector.evaluate(&Snapshot::boolean("ac", true)).is_empty());
    }

    #[test]
    fn test_leak_fires_once_per_rising_run() {
        let detector = TransitionDetector::new(&[leak_monitor("mem", 4)]);
        let fired = feed(&detector, "mem", &[1.0, 2.0, 3.0]);
        assert!(fired.is_empty());

        let fired = feed(&detector, "mem", &[4.0, 5.0, 6.0]);
        assert_eq!(fired, vec![(4.0, Tier::Leak)]);

        // Recovery resets, then a fresh run of 4 increasing samples fires again
        let fired = feed(&detector, "mem", &[2.0, 3.0, 4.0, 5.0]);
        assert_eq!(fired, vec![(5.0, Tier::Leak)]);
    }

    #[test]
    fn test_equal_samples_are_not_increasing() {
        let detector = TransitionDetector::new(&[leak_monitor("mem", 3)]);
        assert!(feed(&detector, "mem", &[1.0, 1.0, 2.0]).is_empty());
        assert_eq!(feed(&detector, "mem", &[3.0]), vec![(3.0, Tier::Leak)]);
    }

    #[test]
    fn test_threshold_and_leak_in_one_sample() {
        let monitor = MonitorConfig {
            key: "mem".into(),
            thresholds: ThresholdSpec::Numeric {
                warning: Some(3.0),
                critical: None,
                hysteresis: 0.0,
                leak_window: Some(3),
            },
            alerts: AlertRoutes::default(),
        };
        let detector = TransitionDetector::new(&[monitor]);
        let fired = feed(&detector, "mem", &[1.0, 2.0, 3.0]);
        assert_eq!(fired, vec![(3.0, Tier::Warning), (3.0, Tier::Leak)]);
    }

    #[test]
    fn test_pattern_matching_prefers_exact_then_longest() {
        let detector = TransitionDetector::new(&[
            numeric_monitor("disk:*", Some(50.0), None, 0.0),
            numeric_monitor("disk:/home:*", Some(70.0), None, 0.0),
            numeric_monitor("disk:/home:usage", Some(90.0), None, 0.0),
        ]);
        let warning_of = |key: &str| match detector.spec_for(key) {
            Some(ThresholdSpec::Numeric { warning, .. }) => *warning,
            _ => None,
        };
        assert_eq!(warning_of("disk:/:usage"), Some(50.0));
        assert_eq!(warning_of("disk:/home:inodes"), Some(70.0));
        assert_eq!(warning_of("disk:/home:usage"), Some(90.0));
        assert_eq!(warning_of("net:eth0"), None);
    }

    #[test]
    fn test_duplicate_monitor_keys_first_wins() {
        let detector = TransitionDetector::new(&[
            numeric_monitor("disk:*", Some(80.0), None, 0.0),
            numeric_monitor("disk:*", Some(50.0), None, 0.0),
        ]);
        let monitor = detector.monitor_for("disk:/").unwrap();
        assert!(matches!(
            monitor.thresholds,
            ThresholdSpec::Numeric { warning: Some(w), .. } if w == 80.0
        ));
        assert!(feed(&detector, "disk:/", &[60.0]).is_empty());
    }

    #[test]
    fn test_malformed_monitor_does_not_shadow_pattern() {
        let detector = TransitionDetector::new(&[
            numeric_monitor("disk:*", Some(80.0), None, 0.0),
            numeric_monitor("disk:/", Some(95.0), Some(80.0), 0.0),
        ]);
        assert_eq!(detector.monitor_for("disk:/").unwrap().key, "disk:*");
    }

    #[test]
    fn test_pattern_keys_keep_independent_state() {
        let detector = TransitionDetector::new(&[numeric_monitor("disk:*", Some(80.0), None, 5.0)]);
        assert_eq!(feed(&detector, "disk:/", &[85.0]).len(), 1);
        assert_eq!(feed(&detector, "disk:/home", &[85.0]).len(), 1);
        assert_eq!(detector.tracked_keys(), 2);
    }

    #[test]
    fn test_evict_idle_resets_history() {
        let detector = TransitionDetector::new(&[numeric_monitor("bat", Some(80.0), None, 5.0)]);
        let t0 = klaxon_common::time::now();
        let old = Snapshot::new("bat", SignalValue::Numeric(90.0), t0 - chrono::Duration::hours(2));
        assert_eq!(detector.evaluate(&old).len(), 1);

        assert_eq!(detector.evict_idle(t0, Duration::from_secs(3600)), 1);
        assert_eq!(detector.tracked_keys(), 0);

        // Tier starts disarmed again
        let fresh = Snapshot::new("bat", SignalValue::Numeric(90.0), t0);
        assert_eq!(detector.evaluate(&fresh).len(), 1);
        assert_eq!(detector.evict_idle(t0, Duration::from_secs(3600)), 0);
    }
}
