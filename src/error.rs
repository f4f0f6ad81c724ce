//! Error types for the companion voice backend

use thiserror::Error;

/// Result type alias for companion operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the companion voice backend
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Text-to-speech backend error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Audio decode/encode error
    #[error("audio error: {0}")]
    Audio(String),

    /// Client transport error (socket closed, send failed)
    #[error("transport error: {0}")]
    Transport(String),

    /// Delivery pipeline contract violation
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// Turn interrupted by the client; not a failure
    #[error("turn cancelled")]
    Cancelled,

    /// Language model / agent error
    #[error("agent error: {0}")]
    Agent(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
