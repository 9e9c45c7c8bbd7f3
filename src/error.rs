//! Error types for the Opera voice controller

use thiserror::Error;

/// Result type alias for voice operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while capturing or synthesizing speech
#[derive(Debug, Error)]
pub enum Error {
    /// Platform lacks speech recognition; capture stays disabled
    #[error("speech recognition unavailable: {0}")]
    CapabilityUnavailable(String),

    /// Synthesis or transcription request failed or returned non-success
    #[error("transport failure: {0}")]
    Transport(String),

    /// Output device rejected or failed to play synthesized audio
    #[error("playback failure: {0}")]
    Playback(String),

    /// Out-of-range speed or unrecognized voice
    #[error("invalid voice configuration: {0}")]
    ConfigInvalid(String),

    /// Configuration loading error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
