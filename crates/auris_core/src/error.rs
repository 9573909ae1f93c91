//! Agent Error Types

use thiserror::Error;

/// Errors surfaced by the voice agent. Grouped along the seven kinds the
/// CLI binary needs to tell apart when deciding whether a failure is
/// retryable (protocol transport) or fatal (configuration).
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("platform error: {0}")]
    Platform(#[from] auris_platform::PlatformError),

    #[error("device error: {0}")]
    Device(String),

    #[error("protocol transport error: {0}")]
    ProtocolTransport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("protocol semantic error: {0}")]
    ProtocolSemantic(String),

    #[error("wire alignment error: {0}")]
    WireAlignment(String),

    #[error("cancelled")]
    Cancellation,
}

impl From<auris_convert::ConvertError> for AgentError {
    fn from(e: auris_convert::ConvertError) -> Self {
        AgentError::Device(e.to_string())
    }
}

/// Result type alias for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AgentError::Configuration("missing qwen.api_key".into());
        assert!(err.to_string().contains("api_key"));
    }

    #[test]
    fn test_error_from_platform() {
        let platform_err = auris_platform::PlatformError::ProcessNotFound("foo.exe".into());
        let agent_err: AgentError = platform_err.into();
        assert!(matches!(agent_err, AgentError::Platform(_)));
    }
}
