//! Component A: audio capture, either from a microphone or from a single
//! process's render output (Windows process-loopback).
//!
//! The device callback thread must stay cheap: it only pushes bytes into a
//! bounded channel and drops the oldest chunk on overflow rather than ever
//! blocking. Everything else - chunking to `chunk_ms`, PCM16LE conversion
//! for process loopback, logging - happens off that thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::{info, warn};

use crate::config::AudioInputConfig;
use crate::error::{AgentError, AgentResult};

fn push_drop_oldest(tx: &Sender<Vec<u8>>, rx: &Receiver<Vec<u8>>, chunk: Vec<u8>, dropped: &AtomicU64) {
    match tx.try_send(chunk) {
        Ok(()) => {}
        Err(TrySendError::Full(chunk)) => {
            dropped.fetch_add(1, Ordering::Relaxed);
            let _ = rx.try_recv();
            let _ = tx.try_send(chunk);
        }
        Err(TrySendError::Disconnected(_)) => {}
    }
}

/// Microphone or process-loopback audio source, yielding PCM16LE mono/stereo
/// chunks sized to roughly `chunk_ms` at the effective sample rate.
pub struct AudioInput {
    rx: Receiver<Vec<u8>>,
    sample_rate: u32,
    channels: u16,
    dropped: Arc<AtomicU64>,
    _stream: Option<cpal::Stream>,
    _loopback_thread: Option<std::thread::JoinHandle<()>>,
    loopback_stop: Option<Arc<std::sync::atomic::AtomicBool>>,
}

impl AudioInput {
    /// Start capturing from the default or named input device.
    pub fn start_microphone(cfg: &AudioInputConfig) -> AgentResult<Self> {
        let host = cpal::default_host();
        let device = match &cfg.device {
            Some(name) => host
                .input_devices()
                .map_err(|e| AgentError::Device(e.to_string()))?
                .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                .ok_or_else(|| AgentError::Device(format!("input device not found: {}", name)))?,
            None => host
                .default_input_device()
                .ok_or_else(|| AgentError::Device("no default input device".into()))?,
        };

        let stream_config = cpal::StreamConfig {
            channels: cfg.channels,
            sample_rate: cpal::SampleRate(cfg.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (tx, rx) = crossbeam_channel::bounded::<Vec<u8>>(cfg.queue_max_chunks);
        let dropped = Arc::new(AtomicU64::new(0));
        let dropped_cb = dropped.clone();

        let target_frames = (cfg.sample_rate as usize * cfg.chunk_ms as usize) / 1000;
        let target_bytes = target_frames * cfg.channels as usize * 2;
        let pending = Arc::new(std::sync::Mutex::new(Vec::<u8>::with_capacity(target_bytes)));
        let pending_cb = pending.clone();
        let tx_cb = tx.clone();
        let rx_cb = rx.clone();

        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[i16], _info: &cpal::InputCallbackInfo| {
                    let mut buf = pending_cb.lock().unwrap();
                    for sample in data {
                        buf.extend_from_slice(&sample.to_le_bytes());
                    }
                    while buf.len() >= target_bytes && target_bytes > 0 {
                        let chunk: Vec<u8> = buf.drain(..target_bytes).collect();
                        push_drop_oldest(&tx_cb, &rx_cb, chunk, &dropped_cb);
                    }
                },
                move |err| warn!(error = %err, "audio_in_stream_error"),
                None,
            )
            .map_err(|e| AgentError::Device(format!("failed to build input stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| AgentError::Device(format!("failed to start input stream: {}", e)))?;

        info!(
            device = ?cfg.device,
            sample_rate = cfg.sample_rate,
            channels = cfg.channels,
            chunk_ms = cfg.chunk_ms,
            "audio_in_started"
        );

        Ok(Self {
            rx,
            sample_rate: cfg.sample_rate,
            channels: cfg.channels,
            dropped,
            _stream: Some(stream),
            _loopback_thread: None,
            loopback_stop: None,
        })
    }

    /// Start process-loopback capture of a single process's render output.
    /// Windows-only; elsewhere returns `PlatformError::FeatureNotAvailable`.
    pub fn start_process_loopback(pid: u32, chunk_ms: u32, queue_max_chunks: usize) -> AgentResult<Self> {
        use auris_platform::windows::{float32le_to_pcm16le, ProcessLoopbackCapture};

        let mut capture = ProcessLoopbackCapture::new(pid)?;
        let channels = capture.channels().max(1);
        let sample_rate = capture.sample_rate().max(1);

        let target_frames = (sample_rate as usize * chunk_ms as usize) / 1000;
        let target_bytes = target_frames * channels as usize * 2;

        let (tx, rx) = crossbeam_channel::bounded::<Vec<u8>>(queue_max_chunks);
        let dropped = Arc::new(AtomicU64::new(0));
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let dropped_th = dropped.clone();
        let stop_th = stop.clone();
        let tx_th = tx.clone();
        let rx_th = rx.clone();

        let handle = std::thread::Builder::new()
            .name("loopback-capture".into())
            .spawn(move || {
                let mut raw_tail: Vec<u8> = Vec::new();
                let mut pcm_buf: Vec<u8> = Vec::new();
                let mut raw = Vec::new();

                while !stop_th.load(Ordering::Relaxed) {
                    raw.clear();
                    if capture.read_blocking(&mut raw).is_err() {
                        break;
                    }
                    if raw.is_empty() {
                        continue;
                    }

                    raw_tail.extend_from_slice(&raw);
                    let (pcm16, tail) = float32le_to_pcm16le(&raw_tail, channels);
                    raw_tail = tail;
                    pcm_buf.extend_from_slice(&pcm16);

                    while pcm_buf.len() >= target_bytes && target_bytes > 0 {
                        let chunk: Vec<u8> = pcm_buf.drain(..target_bytes).collect();
                        push_drop_oldest(&tx_th, &rx_th, chunk, &dropped_th);
                    }
                }
            })
            .map_err(|e| AgentError::Device(format!("failed to spawn loopback thread: {}", e)))?;

        info!(pid, sample_rate, channels, chunk_ms, "loopback_in_starting");

        Ok(Self {
            rx,
            sample_rate,
            channels,
            dropped,
            _stream: None,
            _loopback_thread: Some(handle),
            loopback_stop: Some(stop),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn dropped_chunks(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Fetch the next chunk, waiting up to `timeout` if given. Returns
    /// `None` on timeout so callers can poll for shutdown between calls.
    pub async fn get_chunk(&self, timeout: Option<Duration>) -> Option<Vec<u8>> {
        let rx = self.rx.clone();
        tokio::task::spawn_blocking(move || match timeout {
            Some(t) => rx.recv_timeout(t).ok(),
            None => rx.recv().ok(),
        })
        .await
        .ok()
        .flatten()
    }
}

impl Drop for AudioInput {
    fn drop(&mut self) {
        if let Some(stop) = &self.loopback_stop {
            stop.store(true, Ordering::Relaxed);
        }
        if self.dropped.load(Ordering::Relaxed) > 0 {
            warn!(dropped = self.dropped.load(Ordering::Relaxed), "audio_in_dropped_chunks");
        }
        info!("audio_in_stopped");
    }
}

// cpal::Stream is !Send/!Sync on some backends; AudioInput never touches it
// after construction except to drop it, and every field that is touched
// concurrently (rx, dropped, loopback_stop) is already thread-safe.
unsafe impl Send for AudioInput {}
unsafe impl Sync for AudioInput {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_drop_oldest_drops_when_full() {
        let (tx, rx) = crossbeam_channel::bounded::<Vec<u8>>(1);
        let dropped = AtomicU64::new(0);

        push_drop_oldest(&tx, &rx, vec![1], &dropped);
        push_drop_oldest(&tx, &rx, vec![2], &dropped);

        assert_eq!(dropped.load(Ordering::Relaxed), 1);
        assert_eq!(rx.try_recv().unwrap(), vec![2]);
    }

    #[test]
    #[ignore = "requires audio hardware"]
    fn test_start_microphone_smoke() {
        let cfg = AudioInputConfig {
            device: None,
            sample_rate: 16000,
            channels: 1,
            source: crate::config::InputSource::Microphone,
            chunk_ms: 100,
            queue_max_chunks: 20,
        };
        let input = AudioInput::start_microphone(&cfg);
        assert!(input.is_ok());
    }
}
