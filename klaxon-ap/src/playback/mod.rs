//! Playback: serialized dispatch onto the audio output, chain sequencing

pub mod chain;
pub mod dispatcher;

pub use chain::{ChainReport, ChainSequencer, StepFailure};
pub use dispatcher::{PlayHandle, PlayOutcome, PlayRequest, PlaybackDispatcher, Priority};
