//! Converter Error Types

use thiserror::Error;

/// Errors from the streaming rate/channel converter.
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("unsupported channel count: {0} (expected 1 or 2)")]
    UnsupportedChannels(u16),

    #[error("sample rate must be positive, got {0}")]
    InvalidSampleRate(u32),

    #[error("resampler initialization failed: {0}")]
    ResamplerInit(String),

    #[error("resampler processing failed: {0}")]
    ResamplerProcess(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConvertError::UnsupportedChannels(5);
        assert!(err.to_string().contains('5'));
    }
}
