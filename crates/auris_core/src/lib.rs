//! Auris Core - Realtime Voice Agent Engine
//!
//! This crate bridges local audio I/O to a remote multimodal speech model
//! over a bidirectional WebSocket, including:
//! - Audio capture (microphone or single-process Windows loopback) and
//!   playback, both real-time-safe on their device callback threads
//! - Sample-rate/channel conversion between device and wire formats
//! - The realtime protocol client (session handshake, sender/receiver/
//!   play-tracker tasks, session rotation)
//! - Barge-in cancellation and time-to-first-audio bookkeeping
//! - Configuration loading (TOML fragments, `${VAR}` expansion)
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   crossbeam    ┌──────────────┐  json/b64   ┌─────────────┐
//! │ AudioInput   │──bounded chan─▶│ RealtimeClient│────ws─────▶│ realtime    │
//! │ (A, mic or   │                │ sender task   │             │ model       │
//! │  loopback)   │                └──────────────┘             └─────────────┘
//! └──────────────┘                                                    │
//!                                                                      │ ws
//! ┌──────────────┐   epoch chan   ┌──────────────┐             ┌──────▼──────┐
//! │ AudioOutput  │◀──play_started─│ play_tracker │◀──pcm16─────│ receiver    │
//! │ (B, device   │                │ + TurnLedger │             │ task        │
//! │  callback)   │                └──────────────┘             └─────────────┘
//! └──────────────┘
//! ```
//!
//! [`supervisor::run_forever`] owns the outer reconnect loop; everything
//! else lives for the duration of one WebSocket session.

pub mod barge_in;
pub mod capture;
pub mod codec;
pub mod config;
pub mod device;
pub mod error;
pub mod ledger;
pub mod playback;
pub mod protocol;
pub mod runtime;
pub mod supervisor;

pub use capture::AudioInput;
pub use config::{load_config, AgentConfig};
pub use device::{AudioDevice, DeviceType};
pub use error::{AgentError, AgentResult};
pub use ledger::TurnLedger;
pub use playback::AudioOutput;
pub use protocol::RealtimeClient;
pub use runtime::{run, shutdown_channel, ShutdownHandle, ShutdownSender};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crate_exports() {
        let mut env = std::collections::BTreeMap::new();
        env.insert("QWEN_API_KEY".to_string(), "sk-test".to_string());
        let toml = r#"
            [qwen]
            api_key = "${QWEN_API_KEY}"

            [qwen.realtime]
            url = "wss://example.invalid/realtime"
            model = "qwen3-omni-flash-realtime"

            [audio.input]
            sample_rate = 16000
            channels = 1

            [audio.output]
            sample_rate = 24000
            channels = 1
        "#;
        let cfg: AgentConfig = load_config(&[toml], &env).unwrap();
        assert!(cfg.validate().is_ok());
    }
}
