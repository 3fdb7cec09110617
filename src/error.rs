//! Error types for the Marlene voice assistant

use thiserror::Error;

/// Result type alias for Marlene operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice assistant
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Wake word detector could not be built or run
    #[error("wake word error: {0}")]
    WakeWord(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Agent connection could not be established or was lost
    #[error("connection error: {0}")]
    Connection(String),

    /// Voice session terminated abnormally
    #[error("session error: {0}")]
    Session(String),

    /// Inbound message violated the agent protocol
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Request shape the client deliberately does not handle
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Tool call dispatch failed
    #[error("tool error: {0}")]
    Tool(String),

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

impl Error {
    /// Whether this error must abort startup rather than a single session
    #[must_use]
    pub const fn is_fatal_at_startup(&self) -> bool {
        matches!(self, Self::Config(_) | Self::WakeWord(_) | Self::Audio(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_fatal_kinds() {
        assert!(Error::Config("missing key".into()).is_fatal_at_startup());
        assert!(Error::WakeWord("no keywords".into()).is_fatal_at_startup());
        assert!(Error::Audio("no input device".into()).is_fatal_at_startup());

        assert!(!Error::Connection("refused".into()).is_fatal_at_startup());
        assert!(!Error::Protocol("bad frame".into()).is_fatal_at_startup());
        assert!(!Error::Tool("503".into()).is_fatal_at_startup());
    }
}
