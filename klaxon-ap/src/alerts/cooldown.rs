//! Per-key minimum re-alert interval
//!
//! The gate is interval-agnostic: callers pass the interval for the severity
//! tier they are alerting on, and key entries by tier (see [`cooldown_key`]).

use klaxon_common::Tier;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::sync::lock;

/// Registry key for a monitored key at a given tier
pub fn cooldown_key(key: &str, tier: Tier) -> String {
    format!("{}#{}", key, tier)
}

/// Enforces a minimum interval between alerts per key
#[derive(Default)]
pub struct CooldownGate {
    last_fired: Mutex<HashMap<String, Instant>>,
}

impl CooldownGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check-and-set in one critical section
    ///
    /// Returns true (and records `now` as the last fire time) when at least
    /// `min_interval` has passed since the key last fired, or it never fired.
    /// Returns false without touching state otherwise.
    pub fn allow(&self, key: &str, min_interval: Duration) -> bool {
        let now = Instant::now();
        let mut last_fired = lock(&self.last_fired);
        match last_fired.get(key) {
            Some(&last) if now.saturating_duration_since(last) < min_interval => {
                debug!(key, "Cooldown active");
                false
            }
            _ => {
                last_fired.insert(key.to_string(), now);
                true
            }
        }
    }

    /// Time until the key may fire again (zero when it may fire now)
    pub fn remaining(&self, key: &str, min_interval: Duration) -> Duration {
        let now = Instant::now();
        lock(&self.last_fired)
            .get(key)
            .map(|&last| min_interval.saturating_sub(now.saturating_duration_since(last)))
            .unwrap_or(Duration::ZERO)
    }

    /// Drop entries that last fired more than `max_idle` ago
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut last_fired = lock(&self.last_fired);
        let before = last_fired.len();
        last_fired.retain(|_, last| now.saturating_duration_since(*last) <= max_idle);
        before - last_fired.len()
    }

    pub fn len(&self) -> usize {
        lock(&self.last_fired).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
