//! Error types for klaxon-ap
//!
//! Defines module-specific error types using thiserror for clear error propagation.
//! Component errors ([`ResolveError`], [`ChainError`], [`PlaybackError`]) are
//! reported to the immediate caller; none of them is process-fatal.

use thiserror::Error;

/// Main error type for klaxon-ap
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(#[from] klaxon_common::Error),

    /// Event reference could not be resolved
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Chain control errors
    #[error(transparent)]
    Chain(#[from] ChainError),

    /// Audio playback errors
    #[error(transparent)]
    Playback(#[from] PlaybackError),

    /// HTTP server errors
    #[error("HTTP server error: {0}")]
    Http(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using klaxon-ap Error
pub type Result<T> = std::result::Result<T, Error>;

/// Sound resolution failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// Referenced sound, pool or chain is absent from configuration
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    /// Pool exists but has no candidate sounds
    #[error("pool '{0}' has no sounds")]
    EmptyPool(String),

    /// A chain was referenced where only sounds or pools are playable
    #[error("chain '{0}' cannot be played as a single sound")]
    NotASound(String),
}

/// Chain sequencer failure
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChainError {
    #[error("chain '{0}' is already running")]
    AlreadyRunning(String),

    #[error("chain '{0}' is not running")]
    NotRunning(String),

    #[error("chain '{0}' not found")]
    NotFound(String),

    /// A required step failed; the chain was aborted
    #[error("chain '{chain_id}' aborted: required step {step_index} failed: {error}")]
    RequiredStepFailed {
        chain_id: String,
        step_index: usize,
        error: PlaybackError,
    },
}

/// Playback failure attributed to a single submission
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    /// Player process could not be started
    #[error("failed to start player: {0}")]
    Spawn(String),

    /// Player exited unsuccessfully
    #[error("player exited with {0}")]
    ExitStatus(String),

    /// Play call exceeded the configured timeout
    #[error("playback timed out after {0} ms")]
    Timeout(u64),

    /// Sound could not be resolved to a file
    #[error("unresolvable sound: {0}")]
    Unresolved(String),

    /// Queue was full; request discarded
    #[error("playback queue full, request dropped")]
    Dropped,

    /// Request was cancelled before it reached the output
    #[error("playback request cancelled")]
    Cancelled,

    /// Dispatcher is shutting down
    #[error("playback dispatcher is shut down")]
    ShuttingDown,

    /// Other output failure
    #[error("audio output error: {0}")]
    Output(String),
}
