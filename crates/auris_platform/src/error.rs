//! Platform Error Types

use thiserror::Error;

/// Errors from platform-specific operations: process resolution and
/// process-loopback audio capture.
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("process not found: {0}. start the process first, or set an explicit pid")]
    ProcessNotFound(String),

    #[error("multiple processes matched {name}: pids={pids:?}. set an explicit pid to disambiguate")]
    AmbiguousProcessMatch { name: String, pids: Vec<u32> },

    #[error("feature not available on this platform: {0}")]
    FeatureNotAvailable(String),

    #[error("backend initialization failed: {0}")]
    InitializationFailed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PlatformError::ProcessNotFound("Spotify.exe".into());
        assert!(err.to_string().contains("Spotify.exe"));

        let err = PlatformError::AmbiguousProcessMatch {
            name: "chrome.exe".into(),
            pids: vec![10, 20],
        };
        assert!(err.to_string().contains("10"));
        assert!(err.to_string().contains("20"));
    }
}
