//! Components E/F: the realtime WebSocket client. Owns the `session.update`
//! handshake and the four concurrent tasks a live session runs (sender,
//! receiver, play tracker, session-rotation timer) under one scoped task
//! group, mirroring the upstream TaskGroup semantics where the receive
//! loop ending forces the others to stop too.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::http::Request;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::barge_in::{self, BargeInController};
use crate::capture::AudioInput;
use crate::codec::{decode_chunk, encode_chunk, FrameAligner};
use crate::config::RealtimeConfig;
use crate::error::{AgentError, AgentResult};
use crate::ledger::TurnLedger;
use crate::playback::AudioOutput;
use auris_convert::PcmConverter;

type WsWrite = futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsRead = futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;
type SharedWrite = Arc<Mutex<WsWrite>>;
type SharedConverter = Option<Arc<StdMutex<PcmConverter>>>;

fn monotonic_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

fn event_id() -> String {
    static SEQ: AtomicI64 = AtomicI64::new(0);
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    format!("event_{}_{}", monotonic_ms(), seq)
}

/// Minimal Qwen-Omni-Realtime WebSocket client (server VAD mode).
pub struct RealtimeClient {
    cfg: RealtimeConfig,
    api_key: String,
}

impl RealtimeClient {
    pub fn new(cfg: RealtimeConfig, api_key: String) -> Self {
        Self { cfg, api_key }
    }

    /// Run a single connect-handshake-stream-until-disconnect cycle.
    /// [`crate::supervisor`] is responsible for calling this in a loop with
    /// backoff; this method makes no reconnection decisions of its own.
    pub async fn run_one_session(&self, audio_in: Arc<AudioInput>, audio_out: Arc<AudioOutput>) -> AgentResult<()> {
        let url = format!("{}?model={}", self.cfg.url, self.cfg.model);
        let request = Request::builder()
            .uri(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Host", extract_host(&url))
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tokio_tungstenite::tungstenite::handshake::client::generate_key(),
            )
            .body(())
            .map_err(|e| AgentError::ProtocolSemantic(format!("invalid request: {}", e)))?;

        let (ws_stream, _) = tokio_tungstenite::connect_async(request).await?;
        info!(url = %self.cfg.url, model = %self.cfg.model, "realtime_connected");

        let (write, read) = ws_stream.split();
        let write: SharedWrite = Arc::new(Mutex::new(write));

        let session_started = std::time::Instant::now();

        let in_converter: SharedConverter = if audio_in.sample_rate() != self.cfg.input_sample_rate_hz
            || audio_in.channels() != self.cfg.input_channels
        {
            warn!(
                device_rate_hz = audio_in.sample_rate(),
                device_channels = audio_in.channels(),
                wire_rate_hz = self.cfg.input_sample_rate_hz,
                wire_channels = self.cfg.input_channels,
                "audio_in_adapt"
            );
            Some(Arc::new(StdMutex::new(PcmConverter::new(
                audio_in.channels(),
                audio_in.sample_rate(),
                self.cfg.input_channels,
                self.cfg.input_sample_rate_hz,
            )?)))
        } else {
            None
        };

        let out_converter: SharedConverter = if audio_out.sample_rate() != self.cfg.output_sample_rate_hz
            || audio_out.channels() != self.cfg.output_channels
        {
            warn!(
                wire_rate_hz = self.cfg.output_sample_rate_hz,
                wire_channels = self.cfg.output_channels,
                device_rate_hz = audio_out.sample_rate(),
                device_channels = audio_out.channels(),
                "audio_out_adapt"
            );
            Some(Arc::new(StdMutex::new(PcmConverter::new(
                self.cfg.output_channels,
                self.cfg.output_sample_rate_hz,
                audio_out.channels(),
                audio_out.sample_rate(),
            )?)))
        } else {
            None
        };

        self.send_session_update(&write).await?;

        let ledger = Arc::new(StdMutex::new(TurnLedger::new()));
        let barge = Arc::new(StdMutex::new(BargeInController::new()));

        let mut tasks: JoinSet<AgentResult<()>> = JoinSet::new();

        tasks.spawn(Self::play_tracker(audio_out.clone(), ledger.clone()));
        tasks.spawn(Self::sender(audio_in.clone(), in_converter.clone(), write.clone()));
        tasks.spawn(Self::receiver(
            read,
            self.cfg.output_channels,
            out_converter.clone(),
            audio_out.clone(),
            ledger.clone(),
            barge.clone(),
            write.clone(),
        ));
        tasks.spawn(Self::rotate_session_timer(
            Duration::from_secs(self.cfg.session_max_age_s),
            write.clone(),
        ));

        // Any one task ending (the receiver always ends when the socket
        // closes) tears down the rest of the session.
        let _ = tasks.join_next().await;
        tasks.shutdown().await;

        info!("realtime_disconnected");

        let age = session_started.elapsed();
        if age.as_secs() > self.cfg.session_max_age_s {
            info!(age_s = age.as_secs_f64(), "realtime_session_rotated");
        }

        Ok(())
    }

    async fn send_session_update(&self, write: &SharedWrite) -> AgentResult<()> {
        let payload = json!({
            "event_id": event_id(),
            "type": "session.update",
            "session": {
                "modalities": ["text", "audio"],
                "voice": self.cfg.voice,
                "input_audio_format": "pcm16",
                "output_audio_format": "pcm24",
                "instructions": self.cfg.instructions,
                "turn_detection": {
                    "type": "server_vad",
                    "threshold": self.cfg.turn_detection.threshold.0,
                    "silence_duration_ms": self.cfg.turn_detection.silence_duration_ms,
                },
            },
        });
        send_json(write, &payload).await
    }

    async fn sender(audio_in: Arc<AudioInput>, converter: SharedConverter, write: SharedWrite) -> AgentResult<()> {
        loop {
            let chunk = audio_in.get_chunk(Some(Duration::from_millis(200))).await;
            let Some(chunk) = chunk else { continue };

            let send_chunk = match &converter {
                Some(c) => c.lock().unwrap().convert(&chunk)?,
                None => chunk,
            };

            let payload = json!({
                "event_id": event_id(),
                "type": "input_audio_buffer.append",
                "audio": encode_chunk(&send_chunk),
            });
            send_json(&write, &payload).await?;
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn receiver(
        mut read: WsRead,
        output_channels: u16,
        converter: SharedConverter,
        audio_out: Arc<AudioOutput>,
        ledger: Arc<StdMutex<TurnLedger>>,
        barge: Arc<StdMutex<BargeInController>>,
        write: SharedWrite,
    ) -> AgentResult<()> {
        let mut aligner = FrameAligner::new(output_channels);

        while let Some(msg) = read.next().await {
            let msg = msg?;
            let Message::Text(text) = msg else { continue };
            let data: serde_json::Value = match serde_json::from_str(&text) {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "realtime_event_parse_failed");
                    continue;
                }
            };
            let typ = data.get("type").and_then(|v| v.as_str()).unwrap_or("");

            match typ {
                "error" => {
                    error!(error = ?data.get("error"), "realtime_error");
                }
                "session.created" | "session.updated" => {
                    info!(typ, session = ?data.get("session"), "realtime_session");
                }
                "response.created" => {
                    if let Some(resp_id) = data.get("response").and_then(|r| r.get("id")).and_then(|v| v.as_str()) {
                        barge.lock().unwrap().note_response_created(resp_id.to_string());
                        info!(response_id = resp_id, "response_created");
                    }
                }
                "response.done" => {
                    if let Some(resp_id) = data.get("response").and_then(|r| r.get("id")).and_then(|v| v.as_str()) {
                        info!(response_id = resp_id, "response_done");
                        barge.lock().unwrap().note_response_done(resp_id);
                    }
                }
                "input_audio_buffer.speech_started" => {
                    let is_audible = audio_out.is_audible(barge_in::audible_within_ms());
                    let should_cancel = barge_in::should_barge_in_cancel(is_audible, audio_out.pending_bytes());
                    if should_cancel {
                        Self::cancel_active_response(&write, &audio_out, &ledger, &barge, "speech_started").await;
                    }
                }
                "input_audio_buffer.speech_stopped" => {
                    if let Some(item_id) = data.get("item_id").and_then(|v| v.as_str()) {
                        ledger.lock().unwrap().record_speech_stopped(item_id, monotonic_ms());
                        info!(
                            turn_id = item_id,
                            audio_end_ms = ?data.get("audio_end_ms"),
                            "speech_stopped"
                        );
                    }
                }
                "conversation.item.input_audio_transcription.completed" => {
                    info!(
                        turn_id = ?data.get("item_id"),
                        transcript = ?data.get("transcript"),
                        "asr_completed"
                    );
                }
                "response.audio_transcript.delta" => {
                    debug!(delta = ?data.get("delta"), response_id = ?data.get("response_id"), "tts_transcript_delta");
                }
                "response.audio.delta" => {
                    Self::handle_audio_delta(&data, &mut aligner, &converter, &audio_out, &ledger, &barge);
                }
                "response.audio.done" => {
                    info!(
                        response_id = ?data.get("response_id"),
                        item_id = ?data.get("item_id"),
                        "audio_done"
                    );
                }
                _ => debug!(typ, "realtime_event"),
            }
        }

        Err(AgentError::ProtocolTransport(
            tokio_tungstenite::tungstenite::Error::ConnectionClosed,
        ))
    }

    fn handle_audio_delta(
        data: &serde_json::Value,
        aligner: &mut FrameAligner,
        converter: &SharedConverter,
        audio_out: &Arc<AudioOutput>,
        ledger: &Arc<StdMutex<TurnLedger>>,
        barge: &Arc<StdMutex<BargeInController>>,
    ) {
        let Some(delta) = data.get("delta").and_then(|v| v.as_str()) else {
            return;
        };
        if let Some(resp_id) = data.get("response_id").and_then(|v| v.as_str()) {
            if barge.lock().unwrap().is_cancelled(resp_id) {
                return;
            }
        }

        let raw = match decode_chunk(delta) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "audio_delta_base64_decode_failed");
                return;
            }
        };

        let pcm = aligner.push(&raw);
        if pcm.is_empty() {
            return;
        }

        let pcm16 = match converter {
            Some(c) => match c.lock().unwrap().convert(&pcm) {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "audio_out_convert_failed");
                    return;
                }
            },
            None => pcm,
        };

        let epoch = audio_out.append_pcm16(&pcm16);

        if let Some(item_id) = data.get("item_id").and_then(|v| v.as_str()) {
            let stamped = ledger.lock().unwrap().record_first_audio_delta(item_id, monotonic_ms(), epoch);
            if stamped {
                info!(turn_id = item_id, "first_audio_delta");
            }
        }
    }

    async fn cancel_active_response(
        write: &SharedWrite,
        audio_out: &Arc<AudioOutput>,
        ledger: &Arc<StdMutex<TurnLedger>>,
        barge: &Arc<StdMutex<BargeInController>>,
        reason: &str,
    ) {
        let Some(active_response_id) = barge.lock().unwrap().begin_cancel(monotonic_ms()) else {
            return;
        };

        if let Some(resp_id) = active_response_id {
            let payload = json!({ "event_id": event_id(), "type": "response.cancel" });
            if let Err(e) = send_json(write, &payload).await {
                warn!(error = %e, reason, resp_id, "response_cancel_send_failed");
            }
        }

        let dropped = audio_out.flush();
        ledger.lock().unwrap().clear_epoch_attributions();
        info!(reason, dropped_bytes = dropped, "barge_in_cancel");
    }

    async fn play_tracker(audio_out: Arc<AudioOutput>, ledger: Arc<StdMutex<TurnLedger>>) -> AgentResult<()> {
        loop {
            let Some(epoch) = audio_out.next_play_started().await else {
                return Ok(());
            };
            let Some(turn) = ledger.lock().unwrap().record_play_started(epoch, monotonic_ms()) else {
                continue;
            };
            info!(
                turn_id = turn.turn_id,
                eos_proxy_ms = ?turn.eos_proxy_ms,
                first_audio_delta_ms = ?turn.first_audio_delta_ms,
                first_audible_ms = ?turn.first_audible_ms,
                ttf_delta_ms = ?turn.ttf_delta_ms(),
                ttfa_ms = ?turn.ttfa_ms(),
                "ttfa"
            );
        }
    }

    async fn rotate_session_timer(max_age: Duration, write: SharedWrite) -> AgentResult<()> {
        tokio::time::sleep(max_age).await;
        info!(max_age_s = max_age.as_secs(), "realtime_session_rotation_requested");
        let _ = write
            .lock()
            .await
            .send(Message::Close(Some(tokio_tungstenite::tungstenite::protocol::CloseFrame {
                code: tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode::Normal,
                reason: "session rotation".into(),
            })))
            .await;
        Ok(())
    }
}

async fn send_json(write: &SharedWrite, payload: &serde_json::Value) -> AgentResult<()> {
    let text = serde_json::to_string(payload)
        .map_err(|e| AgentError::ProtocolSemantic(format!("failed to encode event: {}", e)))?;
    write.lock().await.send(Message::Text(text.into())).await?;
    Ok(())
}

fn extract_host(url: &str) -> String {
    url.split("://")
        .nth(1)
        .and_then(|rest| rest.split(['/', '?']).next())
        .unwrap_or("")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_host() {
        assert_eq!(extract_host("wss://example.invalid/realtime?model=x"), "example.invalid");
        assert_eq!(extract_host("wss://example.invalid:443/realtime"), "example.invalid:443");
    }

    #[test]
    fn test_event_id_is_unique_and_monotonic_prefix() {
        let a = event_id();
        let b = event_id();
        assert_ne!(a, b);
        assert!(a.starts_with("event_"));
    }
}
