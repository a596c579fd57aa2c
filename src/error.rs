//! Error types for the voxgate gateway.

/// Top-level error type for the gateway core.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Session lookup or lifecycle error.
    #[error("session error: {0}")]
    Session(String),

    /// Transport send/close error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed or unexpected protocol message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Device directory error (unknown device, state update failure).
    #[error("device error: {0}")]
    Device(String),

    /// Role directory error.
    #[error("role error: {0}")]
    Role(String),

    /// Speech or language-model provider error.
    #[error("provider error: {0}")]
    Provider(String),

    /// Tool registration or execution error.
    #[error("tool error: {0}")]
    Tool(String),

    /// Audio playback or asset error.
    #[error("playback error: {0}")]
    Playback(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// Pending work was cancelled because its session closed.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, GatewayError>;
