//! LLM Streaming Client (C5): one WebSocket connection per call,
//! session handshake, downstream event dispatch, upstream audio
//! forwarding, and instruction sequencing.
//!
//! Connection handling: `connect_async`, a `tokio::select!` loop over
//! the receive stream, and a single writer task draining an outbound
//! channel so concurrent callers never interleave writes on the same
//! socket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::gate::MicGate;
use crate::llm::events::{is_known_benign, DownstreamEvent};
use crate::llm::instruction::{wrap_instruction, Instruction, VadMode};
use crate::llm::sequencer::{InstructionTransmitter, Sequencer};
use crate::rtp::Playout;

/// Observer hooks the call session wires up for logging and metrics.
pub struct LlmClientEvents {
    pub on_log: Box<dyn Fn(String) + Send + Sync>,
    pub on_audio_out: Box<dyn Fn() + Send + Sync>,
    pub on_caller_transcript: Box<dyn Fn(String) + Send + Sync>,
    pub on_llm_transcript: Box<dyn Fn(String) + Send + Sync>,
    pub on_closed: Box<dyn Fn() + Send + Sync>,
}

pub struct SessionParams {
    pub voice: String,
    pub instructions: String,
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub transcription_model: String,
}

/// One call's connection to the LLM realtime WebSocket.
pub struct LlmClient {
    outbound: mpsc::UnboundedSender<Message>,
    mic_gate: Arc<MicGate>,
    playout: Playout,
    events: Arc<LlmClientEvents>,
    sequencer: Arc<Sequencer<WsTransmitter>>,
    closed: Arc<AtomicBool>,
}

struct WsTransmitter {
    outbound: mpsc::UnboundedSender<Message>,
}

impl InstructionTransmitter for WsTransmitter {
    fn transmit(&self, instruction: Instruction) {
        let vad = match instruction.vad_mode {
            VadMode::Server => json!({
                "type": "server_vad",
                "threshold": 0.5,
                "prefix_padding_ms": 300,
                "silence_duration_ms": 500,
            }),
            VadMode::Semantic => json!({ "type": "semantic_vad" }),
        };

        let session_update = json!({
            "type": "session.update",
            "session": {
                "instructions": instruction.text,
                "turn_detection": vad,
            }
        });
        let _ = self
            .outbound
            .send(Message::Text(session_update.to_string()));

        if instruction.silent {
            return;
        }

        let wrapped = wrap_instruction(&instruction.text, false);
        let response_create = json!({
            "type": "response.create",
            "response": {
                "modalities": ["text", "audio"],
                "instructions": wrapped,
            }
        });
        let _ = self
            .outbound
            .send(Message::Text(response_create.to_string()));
    }

    fn send_cancel(&self) {
        let cancel = json!({ "type": "response.cancel" });
        let _ = self.outbound.send(Message::Text(cancel.to_string()));
    }
}

impl LlmClient {
    /// Connect, perform the `session.update` handshake, and spawn the
    /// receive loop. Returns the client plus a join handle for the
    /// receive task so the call session can await it on teardown.
    pub async fn connect(
        url: &str,
        params: SessionParams,
        mic_gate: Arc<MicGate>,
        playout: Playout,
        events: LlmClientEvents,
    ) -> Result<(Arc<Self>, tokio::task::JoinHandle<()>), String> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| format!("failed to connect to LLM websocket: {e}"))?;

        let (mut write, mut read) = ws_stream.split();

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

        // Single writer task: every outbound frame funnels through
        // this channel so sends are strictly ordered, matching the
        // ordering guarantee in §5.
        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if write.send(message).await.is_err() {
                    break;
                }
            }
        });

        let session_update = json!({
            "type": "session.update",
            "session": {
                "modalities": ["text", "audio"],
                "voice": params.voice,
                "instructions": params.instructions,
                "input_audio_format": params.input_audio_format,
                "output_audio_format": params.output_audio_format,
                "input_audio_transcription": { "model": params.transcription_model },
                "turn_detection": {
                    "type": "server_vad",
                    "threshold": 0.5,
                    "prefix_padding_ms": 300,
                    "silence_duration_ms": 500,
                },
                "tools": [],
            }
        });
        outbound_tx
            .send(Message::Text(session_update.to_string()))
            .map_err(|_| "LLM send channel closed during handshake".to_string())?;

        let events = Arc::new(events);
        let transmitter = Arc::new(WsTransmitter {
            outbound: outbound_tx.clone(),
        });
        let sequencer = Sequencer::new(transmitter);
        let closed = Arc::new(AtomicBool::new(false));

        let client = Arc::new(Self {
            outbound: outbound_tx,
            mic_gate: mic_gate.clone(),
            playout: playout.clone(),
            events: events.clone(),
            sequencer,
            closed: closed.clone(),
        });

        let receive_client = client.clone();
        let handle = tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => receive_client.handle_text(&text),
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            closed.store(true, Ordering::SeqCst);
            (events.on_closed)();
        });

        Ok((client, handle))
    }

    /// Send an optional greeting as `conversation.item.create` +
    /// `response.create`.
    pub fn send_greeting(&self, text: &str) {
        let item = json!({
            "type": "conversation.item.create",
            "item": {
                "type": "message",
                "role": "user",
                "content": [{ "type": "input_text", "text": text }]
            }
        });
        let _ = self.outbound.send(Message::Text(item.to_string()));

        let create = json!({
            "type": "response.create",
            "response": { "modalities": ["text", "audio"] }
        });
        let _ = self.outbound.send(Message::Text(create.to_string()));
    }

    /// `forward_audio`: base64-encode and append to the model's input
    /// buffer. Called by the mic gate when open.
    pub fn forward_audio(&self, bytes: &[u8]) {
        let encoded = BASE64.encode(bytes);
        let append = json!({
            "type": "input_audio_buffer.append",
            "audio": encoded,
        });
        let _ = self.outbound.send(Message::Text(append.to_string()));
    }

    /// `on_instruction`: hand a new engine instruction to the
    /// sequencer.
    pub fn on_instruction(&self, instruction: Instruction) {
        self.sequencer.on_instruction(instruction);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send a graceful close frame.
    pub fn dispose(&self) {
        let _ = self.outbound.send(Message::Close(None));
    }

    fn handle_text(&self, text: &str) {
        let event: DownstreamEvent = match serde_json::from_str(text) {
            Ok(event) => event,
            Err(e) => {
                (self.events.on_log)(format!("failed to parse LLM event: {e}"));
                return;
            }
        };

        match event {
            DownstreamEvent::SessionCreated | DownstreamEvent::SessionUpdated => {}
            DownstreamEvent::ResponseCreated | DownstreamEvent::ResponseAudioStarted => {
                self.mic_gate.arm();
            }
            DownstreamEvent::ResponseAudioDelta { delta } => match BASE64.decode(delta) {
                Ok(audio) => {
                    self.playout.buffer(&audio);
                    (self.events.on_audio_out)();
                }
                Err(e) => {
                    (self.events.on_log)(format!("failed to decode audio delta: {e}"));
                }
            },
            DownstreamEvent::ResponseAudioDone => {
                self.mic_gate.audio_done();
                self.playout.flush();
            }
            DownstreamEvent::ResponseAudioTranscriptDone { transcript } => {
                (self.events.on_llm_transcript)(transcript);
            }
            DownstreamEvent::CallerTranscriptionCompleted { transcript } => {
                (self.events.on_caller_transcript)(transcript);
            }
            DownstreamEvent::SpeechStarted => {
                self.playout.clear();
                self.mic_gate.barge_in();
            }
            DownstreamEvent::SpeechStopped => {
                self.sequencer.cancel_for_vad();
            }
            DownstreamEvent::ResponseCanceled => {
                self.sequencer.on_response_canceled();
            }
            DownstreamEvent::Error { error } => {
                if !is_known_benign(&error.message) {
                    (self.events.on_log)(format!("LLM error: {}", error.message));
                }
            }
            DownstreamEvent::Unknown => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_benign_error_is_not_logged() {
        assert!(is_known_benign("no active response found"));
    }
}
