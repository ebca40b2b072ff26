//! Event types for the klaxon event stream
//!
//! Published by the alert player on a broadcast channel and streamed to
//! operators over SSE.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::signal::Tier;

/// Chain lifecycle state
///
/// `Idle -> Running -> {Completed, Aborted}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainState {
    Idle,
    Running,
    Completed,
    Aborted,
}

/// Why a detected transition did not produce audio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionReason {
    /// Vetoed by the upstream quiet-hours/profile gate
    Vetoed,
    /// Cooldown for this key and tier has not elapsed
    CoolingDown,
    /// No sound is routed for this tier
    Unrouted,
}

/// Klaxon event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AlertEvent {
    /// Detector classified a snapshot as a transition
    TransitionDetected {
        key: String,
        tier: Tier,
        value: String,
        timestamp: DateTime<Utc>,
    },

    /// Transition was detected but not played
    AlertSuppressed {
        key: String,
        tier: Tier,
        reason: SuppressionReason,
        timestamp: DateTime<Utc>,
    },

    /// Sound submitted to the playback dispatcher
    AlertDispatched {
        key: String,
        tier: Tier,
        sound: String,
        timestamp: DateTime<Utc>,
    },

    /// Playback request finished on the audio output
    PlaybackCompleted {
        request_id: u64,
        sound: String,
        timestamp: DateTime<Utc>,
    },

    /// Playback request failed (player error or timeout)
    PlaybackFailed {
        request_id: u64,
        sound: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Playback request dropped because the queue was full
    PlaybackDropped {
        request_id: u64,
        sound: String,
        timestamp: DateTime<Utc>,
    },

    /// Chain changed lifecycle state
    ChainStateChanged {
        chain_id: String,
        state: ChainState,
        timestamp: DateTime<Utc>,
    },

    /// A chain step failed to play
    ChainStepFailed {
        chain_id: String,
        step_index: usize,
        required: bool,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl AlertEvent {
    /// Event type name, used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            AlertEvent::TransitionDetected { .. } => "TransitionDetected",
            AlertEvent::AlertSuppressed { .. } => "AlertSuppressed",
            AlertEvent::AlertDispatched { .. } => "AlertDispatched",
            AlertEvent::PlaybackCompleted { .. } => "PlaybackCompleted",
            AlertEvent::PlaybackFailed { .. } => "PlaybackFailed",
            AlertEvent::PlaybackDropped { .. } => "PlaybackDropped",
            AlertEvent::ChainStateChanged { .. } => "ChainStateChanged",
            AlertEvent::ChainStepFailed { .. } => "ChainStepFailed",
        }
    }
}
