//! Platform-specific process resolution and process-loopback audio capture.
//!
//! `audio.loopback.*` capture (see the core crate) needs two things the
//! standard library doesn't give you: a way to turn a configured PID or
//! process name into a concrete PID, and a way to open a WASAPI stream
//! scoped to that one process's render output. Both only exist on Windows
//! today; other targets get `PlatformError::FeatureNotAvailable`.

mod error;

#[cfg(target_os = "windows")]
pub mod windows;

pub use error::PlatformError;

#[cfg(not(target_os = "windows"))]
pub mod windows {
    //! Stub surface for non-Windows targets so the core crate can be built
    //! without `#[cfg]` at every call site.
    use crate::error::PlatformError;

    #[derive(Debug, Clone)]
    pub struct ProcessInfo {
        pub pid: u32,
        pub parent_pid: u32,
        pub exe_name: String,
        pub thread_count: u32,
    }

    pub struct ProcessEnumerator;

    impl ProcessEnumerator {
        pub fn new() -> Self {
            Self
        }

        pub fn enumerate_all(&self) -> Result<Vec<ProcessInfo>, PlatformError> {
            Err(PlatformError::FeatureNotAvailable(
                "process enumeration only available on Windows".into(),
            ))
        }
    }

    impl Default for ProcessEnumerator {
        fn default() -> Self {
            Self::new()
        }
    }

    pub fn resolve_pid(
        _enumerator: &ProcessEnumerator,
        _pid: Option<u32>,
        _process_name: Option<&str>,
    ) -> Result<u32, PlatformError> {
        Err(PlatformError::FeatureNotAvailable(
            "process loopback capture only available on Windows".into(),
        ))
    }

    pub struct ProcessLoopbackCapture;

    impl ProcessLoopbackCapture {
        pub fn new(_pid: u32) -> Result<Self, PlatformError> {
            Err(PlatformError::FeatureNotAvailable(
                "process loopback capture only available on Windows".into(),
            ))
        }

        pub fn channels(&self) -> u16 {
            1
        }

        pub fn sample_rate(&self) -> u32 {
            48000
        }

        pub fn bits_per_sample(&self) -> u16 {
            32
        }

        pub fn read_blocking(&mut self, _out: &mut Vec<u8>) -> Result<(), PlatformError> {
            Err(PlatformError::FeatureNotAvailable(
                "process loopback capture only available on Windows".into(),
            ))
        }
    }

    pub fn float32le_to_pcm16le(raw: &[u8], channels: u16) -> (Vec<u8>, Vec<u8>) {
        super::windows_stub_convert(raw, channels)
    }
}

#[cfg(not(target_os = "windows"))]
fn windows_stub_convert(raw: &[u8], channels: u16) -> (Vec<u8>, Vec<u8>) {
    // Same pure conversion logic as the Windows implementation; kept here so
    // unit tests for the PCM16 conversion run on every development platform.
    if raw.is_empty() {
        return (Vec::new(), Vec::new());
    }
    let frame_bytes_f32 = 4 * channels as usize;
    let aligned = (raw.len() / frame_bytes_f32) * frame_bytes_f32;
    if aligned == 0 {
        return (Vec::new(), raw.to_vec());
    }
    let (head, tail) = raw.split_at(aligned);
    let mut out = Vec::with_capacity(head.len() / 2);
    for chunk in head.chunks_exact(4) {
        let sample = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let clipped = sample.clamp(-1.0, 1.0);
        let scaled = (clipped * 32767.0) as i16;
        out.extend_from_slice(&scaled.to_le_bytes());
    }
    (out, tail.to_vec())
}
