//! # Klaxon Alert Player Library (klaxon-ap)
//!
//! Turns a stream of signal snapshots into audible alerts.
//!
//! **Purpose:** Detect meaningful transitions (threshold crossings with
//! hysteresis, categorical changes, leaks), gate them through an upstream
//! veto and per-key cooldowns, resolve them to sounds, pools or chains, and
//! play them one at a time on a single audio output.
//!
//! **Architecture:** many concurrent producers, one playback consumer. All
//! shared state uses short per-key critical sections; no lock is held across
//! a wait or a play call.

pub mod alerts;
pub mod api;
pub mod audio;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod playback;
pub mod sounds;
pub mod state;

mod sync;

pub use engine::{AlertEngine, AlertOutcome};
pub use error::{Error, Result};
pub use state::SharedState;
