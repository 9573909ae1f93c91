//! Windows backend: process resolution and process-loopback capture.

pub mod capture;
pub mod com;
pub mod process;
pub mod version;

pub use capture::{float32le_to_pcm16le, ProcessLoopbackCapture};
pub use process::{resolve_pid, ProcessEnumerator, ProcessInfo};
pub use version::WindowsVersion;
