//! Error types for the medsched_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for medsched_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// Malformed configuration, rule or medication definition
    #[error("Configuration error: {0}")]
    Config(String),

    /// A constraint failed validation at load time
    #[error("Invalid constraint: {0}")]
    InvalidConstraint(String),

    /// A missed dose or constraint names a medication that was never loaded
    #[error("Unknown medication: {0}")]
    UnknownMedication(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}
