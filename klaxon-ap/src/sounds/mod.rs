//! Sound catalog resolution and pool selection

pub mod resolver;

pub use resolver::{PlaybackUnit, ResolvedSound, SoundResolver};
