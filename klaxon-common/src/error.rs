//! Errors raised while loading configuration and parsing shared types
//!
//! Runtime failures (resolution, playback, chains) live in `klaxon-ap`; this
//! crate only fails before the engine starts.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Config file could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid TOML or does not match the schema
    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Cross-reference or range problems found by `KlaxonConfig::validate`,
    /// or no config file could be located
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed `sound:`/`pool:`/`chain:` reference
    #[error("Invalid reference: {0}")]
    InvalidInput(String),
}
