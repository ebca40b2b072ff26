//! # Klaxon Common Library
//!
//! Shared code for the klaxon alerting services including:
//! - Signal observation types (Snapshot, SignalValue, TransitionEvent)
//! - Event types broadcast to operators (AlertEvent enum)
//! - Configuration model and config file resolution
//! - Time utilities (time windows, duration helpers)

pub mod config;
pub mod error;
pub mod events;
pub mod signal;
pub mod time;

pub use error::{Error, Result};
pub use signal::{Direction, SignalValue, Snapshot, Tier, TransitionEvent};
