//! Error types for narrator

use thiserror::Error;

/// Result type alias for narrator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in narrator
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device or playback error
    #[error("audio error: {0}")]
    Audio(String),

    /// WAV container could not be parsed
    #[error("malformed container: {0}")]
    MalformedContainer(String),

    /// WAV bit depth other than 8 or 16
    #[error("unsupported bit depth: {0}")]
    UnsupportedDepth(u16),

    /// A single stream record could not be decoded
    #[error("decode failure: {0}")]
    Decode(String),

    /// Synthesis for a node did not resolve in time
    #[error("synthesis for node {node} timed out")]
    RequestTimeout {
        /// Node whose request expired
        node: usize,
    },

    /// Streaming session failed before completion
    #[error("network failure: {0}")]
    Network(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Record carried no payload
    #[error("empty payload")]
    EmptyPayload,

    /// Another pipeline holds the output device
    #[error("audio output is in use by another pipeline")]
    DeviceBusy,

    /// Presentation or chat session input was empty or invalid
    #[error("session error: {0}")]
    Session(String),

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

    /// Base64 payload error
    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),
}
