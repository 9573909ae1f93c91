//! Top-level wiring: turns a loaded [`AgentConfig`] into running capture,
//! playback, and protocol supervisor tasks, and tears them down on
//! shutdown. This is the one entry point the CLI binary calls.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::capture::AudioInput;
use crate::config::{AgentConfig, InputSource};
use crate::error::AgentResult;
use crate::playback::AudioOutput;
use crate::protocol::RealtimeClient;
use crate::supervisor;

/// Cheap clonable shutdown signal. Dropping every [`ShutdownSender`] also
/// requests shutdown, so a `main` that exits without calling `shutdown()`
/// still unblocks the runtime.
#[derive(Clone)]
pub struct ShutdownHandle(watch::Receiver<bool>);

pub struct ShutdownSender(watch::Sender<bool>);

impl ShutdownSender {
    pub fn shutdown(&self) {
        let _ = self.0.send(true);
    }
}

pub fn shutdown_channel() -> (ShutdownSender, ShutdownHandle) {
    let (tx, rx) = watch::channel(false);
    (ShutdownSender(tx), ShutdownHandle(rx))
}

impl ShutdownHandle {
    pub async fn wait(&mut self) {
        let _ = self.0.wait_for(|shutdown| *shutdown).await;
    }
}

/// Start audio I/O and the realtime protocol supervisor, running until
/// `shutdown` fires.
pub async fn run(config: AgentConfig, mut shutdown: ShutdownHandle) -> AgentResult<()> {
    config.validate()?;

    let audio_in = Arc::new(match config.audio.input.source {
        InputSource::Microphone => AudioInput::start_microphone(&config.audio.input)?,
        InputSource::ProcessLoopback => {
            let pid = auris_platform::windows::resolve_pid(
                &auris_platform::windows::ProcessEnumerator::new(),
                config.audio.loopback.pid,
                config.audio.loopback.process_name.as_deref(),
            )?;
            AudioInput::start_process_loopback(pid, config.audio.input.chunk_ms, config.audio.input.queue_max_chunks)?
        }
    });

    let audio_out = Arc::new(AudioOutput::start(&config.audio.output)?);

    let client = RealtimeClient::new(config.qwen.realtime.clone(), config.qwen.api_key.clone());

    let supervisor_task = tokio::spawn(async move {
        supervisor::run_forever(&client, audio_in, audio_out).await;
    });

    shutdown.wait().await;
    info!("shutdown_requested");
    supervisor_task.abort();

    Ok(())
}
