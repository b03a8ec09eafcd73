//! Error types for the kiosk voice subsystem

use thiserror::Error;

/// Result type alias for kiosk voice operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the speech and proximity subsystem
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A capability probe did not answer in time
    #[error("probe timed out after {0:?}")]
    ProbeTimeout(std::time::Duration),

    /// A recognition strategy could not be brought up
    #[error("initialization failed: {0}")]
    Initialization(String),

    /// The streaming connection (or recognizer process) went away mid-session
    #[error("transport lost: {0}")]
    TransportLost(String),

    /// Microphone, model or platform facility unavailable
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Malformed message from a peer
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The companion explicitly reported an error
    #[error("companion rejected request: {0}")]
    RemoteRejected(String),

    /// Operation not allowed in the current state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Proximity read ended without a card
    #[error("proximity read timed out")]
    ReadTimeout,

    /// Proximity read failed
    #[error("proximity read failed: {0}")]
    ReadError(String),

    /// Audio error
    #[error("audio error: {0}")]
    Audio(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket error
    #[error("websocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

impl Error {
    /// Whether this error ends the current recognition session
    ///
    /// Probe timeouts and single synthesis failures are absorbed by fallback;
    /// everything that tears down a session is surfaced to the caller.
    #[must_use]
    pub const fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::Initialization(_)
                | Self::TransportLost(_)
                | Self::DeviceUnavailable(_)
                | Self::Protocol(_)
                | Self::RemoteRejected(_)
                | Self::WebSocket(_)
        )
    }
}
