//! Error types for the Jubilee core

/// Main error type for Jubilee core operations
#[derive(Debug, thiserror::Error)]
pub enum JubileeError {
    /// Transaction source (ledger backend) failure
    #[error("Source error: {0}")]
    Source(String),

    /// Push channel subscription failure
    #[error("Channel error: {0}")]
    Channel(String),

    /// Identity resolution failure
    #[error("Identity error: {0}")]
    Identity(String),

    /// Payload that could not be parsed into the expected shape
    #[error("Malformed payload: {0}")]
    Malformed(String),

    /// Audio asset load/playback failure
    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl JubileeError {
    /// True for errors the engine recovers from by degrading (never
    /// surfaced to the user as an error condition)
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Internal(_))
    }
}

impl From<serde_json::Error> for JubileeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(format!("JSON error: {}", err))
    }
}

/// Result type alias for Jubilee core operations
pub type Result<T> = std::result::Result<T, JubileeError>;
