//! Shared runtime state
//!
//! Event broadcaster and counters shared by the engine, dispatcher, chain
//! sequencer and HTTP API.

use klaxon_common::events::AlertEvent;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

/// Snapshot of the runtime counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub snapshots: u64,
    pub transitions: u64,
    pub suppressed: u64,
    pub dispatched: u64,
    pub played: u64,
    pub failed: u64,
    pub dropped: u64,
}

/// Shared state accessible by all components
pub struct SharedState {
    /// Event broadcaster for SSE events
    event_tx: broadcast::Sender<AlertEvent>,

    snapshots: AtomicU64,
    transitions: AtomicU64,
    suppressed: AtomicU64,
    dispatched: AtomicU64,
    played: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl SharedState {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            event_tx,
            snapshots: AtomicU64::new(0),
            transitions: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            played: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Broadcast an event to all listeners, counting it
    pub fn broadcast_event(&self, event: AlertEvent) {
        let counter = match &event {
            AlertEvent::TransitionDetected { .. } => &self.transitions,
            AlertEvent::AlertSuppressed { .. } => &self.suppressed,
            AlertEvent::AlertDispatched { .. } => &self.dispatched,
            AlertEvent::PlaybackCompleted { .. } => &self.played,
            AlertEvent::PlaybackFailed { .. } => &self.failed,
            AlertEvent::PlaybackDropped { .. } => &self.dropped,
            AlertEvent::ChainStateChanged { .. } | AlertEvent::ChainStepFailed { .. } => {
                let _ = self.event_tx.send(event);
                return;
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
        // No receivers is OK
        let _ = self.event_tx.send(event);
    }

    /// Subscribe to the event stream
    pub fn subscribe_events(&self) -> broadcast::Receiver<AlertEvent> {
        self.event_tx.subscribe()
    }

    pub fn record_snapshot(&self) {
        self.snapshots.fetch_add(1, Ordering::Relaxed);
    }

    pub fn counters(&self) -> Counters {
        Counters {
            snapshots: self.snapshots.load(Ordering::Relaxed),
            transitions: self.transitions.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            played: self.played.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}
