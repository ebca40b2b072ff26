//! Audio output implementations

pub mod output;

pub use output::{AudioOutput, CommandOutput, LogOutput};
