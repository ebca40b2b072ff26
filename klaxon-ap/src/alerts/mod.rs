//! Alert decision pipeline: transition detection, upstream gate, cooldown

pub mod cooldown;
pub mod detector;
pub mod gate;

pub use cooldown::{cooldown_key, CooldownGate};
pub use detector::TransitionDetector;
pub use gate::{AlertGate, AllowAll};
