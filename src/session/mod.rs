//! Call Session (C6): composes the codec, playout engine, mic gate,
//! LLM client, and engine adapter for one call, and owns its
//! drain-aware teardown.

pub mod stats;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::codec::Codec;
use crate::config::Config;
use crate::engine::{DialogueEngine, EngineActor, EngineEvents};
use crate::error::CallEndCause;
use crate::gate::{MicGate, MicGateEvents};
use crate::llm::{LlmClient, LlmClientEvents, SessionParams};
use crate::rtp::{Playout, PlayoutEvents, RtpSocket};
use stats::CallStats;

const RESPONSE_FINISH_BUDGET: Duration = Duration::from_secs(15);
const PLAYOUT_DRAIN_BUDGET: Duration = Duration::from_secs(20);
const HANGUP_MARGIN: Duration = Duration::from_secs(1);
const RTP_TIMEOUT_POLL: Duration = Duration::from_millis(500);

pub struct CallSessionEvents {
    pub on_log: Box<dyn Fn(String) + Send + Sync>,
    pub on_ended: Box<dyn Fn(CallEndCause) + Send + Sync>,
}

/// One call's composed runtime. `call_id` is the SIP Call-ID used as
/// the bridge registry key.
pub struct CallSession {
    pub call_id: String,
    codec: Codec,
    playout: Playout,
    mic_gate: Arc<MicGate>,
    llm_client: Arc<LlmClient>,
    engine_actor: EngineActor,
    stats: Arc<CallStats>,
    cancel: CancellationToken,
    events: Arc<CallSessionEvents>,
}

impl CallSession {
    /// Build and start a session from a negotiated INVITE. `rtp_socket`
    /// is the already-bound local RTP socket; `rtp_remote` the
    /// caller's announced media address (symmetric RTP relearns it
    /// from the first inbound packet regardless of what's passed
    /// here).
    pub async fn start(
        call_id: String,
        config: &Config,
        codec: Codec,
        rtp_socket: RtpSocket,
        rtp_remote: SocketAddr,
        engine: Arc<dyn DialogueEngine>,
        events: Arc<CallSessionEvents>,
    ) -> Result<Arc<Self>, String> {
        rtp_socket.set_remote(rtp_remote);
        let rtp_socket = Arc::new(rtp_socket);
        let playout = Playout::new(
            rtp_socket.clone(),
            codec,
            config.rtp.circuit_breaker_threshold,
        );
        let stats = Arc::new(CallStats::new());
        let cancel = CancellationToken::new();

        // The mic gate's forward-to-LLM callback needs the LLM client,
        // but the LLM client's constructor needs the mic gate (so it
        // can `arm()`/`audio_done()` it from downstream events). Break
        // the cycle with a cell the gate's closure reads through,
        // filled in once the client exists.
        let llm_cell: Arc<Mutex<Option<Arc<LlmClient>>>> = Arc::new(Mutex::new(None));
        let forward_cell = llm_cell.clone();
        let mic_gate = MicGate::new(MicGateEvents {
            forward_upstream: Box::new(move |frame| {
                if let Some(client) = forward_cell.lock().as_ref() {
                    client.forward_audio(frame);
                }
            }),
            on_barge_in: Box::new(|| {}),
        });

        let greeting = engine.build_greeting();
        let system_prompt = engine.system_prompt();

        let llm_log_events = events.clone();
        let engine_for_caller_transcripts = engine.clone();
        let engine_for_llm_transcripts = engine.clone();
        let (llm_client, _receive_handle) = LlmClient::connect(
            &config.llm.url,
            SessionParams {
                voice: config.llm.voice.clone(),
                instructions: system_prompt,
                input_audio_format: codec_format_name(codec),
                output_audio_format: codec_format_name(codec),
                transcription_model: "whisper-1".to_string(),
            },
            mic_gate.clone(),
            playout.clone(),
            LlmClientEvents {
                on_log: Box::new(move |msg| (llm_log_events.on_log)(msg)),
                on_audio_out: Box::new(|| {}),
                on_caller_transcript: Box::new(move |text| {
                    engine_for_caller_transcripts.process_caller_transcript(text)
                }),
                on_llm_transcript: Box::new(move |text| {
                    engine_for_llm_transcripts.process_llm_transcript(text)
                }),
                on_closed: Box::new(|| {}),
            },
        )
        .await?;
        *llm_cell.lock() = Some(llm_client.clone());

        // `on_hangup` needs the finished `CallSession` to call
        // `drain_and_hangup` on, but the session can't exist until the
        // engine (and its events) already do. Same cell trick as
        // `llm_cell` above, filled in right after `Arc::new(Self {..})`.
        let session_cell: Arc<Mutex<Option<Arc<CallSession>>>> = Arc::new(Mutex::new(None));
        let hangup_cell = session_cell.clone();

        let instruction_client = llm_client.clone();
        let engine_events = Arc::new(EngineEvents {
            on_instruction: Box::new(move |instruction| instruction_client.on_instruction(instruction)),
            on_booking_ready: Box::new(|_| {}),
            on_fare_ready: Box::new(|_| {}),
            on_hangup: Box::new(move || {
                let cell = hangup_cell.clone();
                tokio::spawn(async move {
                    let session = cell.lock().clone();
                    if let Some(session) = session {
                        session.drain_and_hangup().await;
                    }
                });
            }),
        });

        let engine_actor = EngineActor::spawn(engine.clone(), engine_events);

        let session = Arc::new(Self {
            call_id,
            codec,
            playout: playout.clone(),
            mic_gate,
            llm_client,
            engine_actor,
            stats,
            cancel,
            events: events.clone(),
        });
        *session_cell.lock() = Some(session.clone());

        session.engine_actor.start();
        session.llm_client.send_greeting(&greeting);

        let run_playout = playout.clone();
        let fault_events = events.clone();
        let fault_session = session.clone();
        let drained_mic_gate = session.mic_gate.clone();
        let playout_cancel = session.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = run_playout.run(PlayoutEvents {
                    on_drained: Box::new(move || drained_mic_gate.playout_drained()),
                    on_fault: Box::new(move |reason| {
                        (fault_events.on_log)(format!("playout fault: {reason}"));
                        fault_session.teardown(CallEndCause::CircuitBreakerTripped);
                    }),
                    on_log: Box::new(|_| {}),
                }) => {}
                _ = playout_cancel.cancelled() => {}
            }
        });

        let recv_socket = rtp_socket;
        let recv_session = session.clone();
        let recv_cancel = session.cancel.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            loop {
                tokio::select! {
                    result = recv_socket.recv(&mut buf) => match result {
                        Ok((len, from)) => recv_session.handle_inbound_rtp(from, &buf[..len]),
                        Err(e) => {
                            (recv_session.events.on_log)(format!("RTP recv error: {e}"));
                            return;
                        }
                    },
                    _ = recv_cancel.cancelled() => return,
                }
            }
        });

        Ok(session)
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn stats_snapshot(&self) -> stats::CallStatsSnapshot {
        self.stats.snapshot(self.playout.queue_depth())
    }

    /// Record one inbound RTP audio frame: learns the symmetric-RTP
    /// remote, updates stats, and routes through the mic gate.
    pub fn handle_inbound_rtp(&self, from: SocketAddr, payload: &[u8]) {
        self.playout.learn_remote(from);
        self.stats.record_received();
        self.mic_gate.handle_inbound(payload);
    }

    /// Drain-aware hangup: wait for the current response to finish (up
    /// to 15 s), then for the playout queue to drain (up to 20 s), then
    /// an extra 1 s margin, then tear down.
    pub async fn drain_and_hangup(&self) {
        let deadline = tokio::time::Instant::now() + RESPONSE_FINISH_BUDGET;
        while tokio::time::Instant::now() < deadline && !self.mic_gate.response_completed() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let deadline = tokio::time::Instant::now() + PLAYOUT_DRAIN_BUDGET;
        while tokio::time::Instant::now() < deadline && self.playout.queue_depth() > 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        tokio::time::sleep(HANGUP_MARGIN).await;
        self.teardown(CallEndCause::EngineHangup);
    }

    /// Poll for RTP inactivity; intended to be spawned once per call.
    pub async fn watch_rtp_timeout(&self, timeout: Duration) {
        loop {
            tokio::time::sleep(RTP_TIMEOUT_POLL).await;
            if self.cancel.is_cancelled() {
                return;
            }
            let snapshot = self.stats_snapshot();
            if Duration::from_secs(snapshot.secs_since_last_received) > timeout {
                self.teardown(CallEndCause::RtpTimeout);
                return;
            }
        }
    }

    pub fn teardown(&self, cause: CallEndCause) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        self.playout.stop();
        let force = matches!(
            cause,
            CallEndCause::RtpTimeout | CallEndCause::CircuitBreakerTripped
        );
        self.engine_actor.end_call(force);
        self.llm_client.dispose();
        (self.events.on_ended)(cause);
    }
}

fn codec_format_name(codec: Codec) -> String {
    match codec {
        Codec::Alaw => "g711_alaw".to_string(),
        Codec::Ulaw => "g711_ulaw".to_string(),
    }
}

/// Pick the preferred codec from an SDP offer's advertised payload
/// types, falling back to whichever of {PCMA, PCMU} is present.
pub fn negotiate_codec(sdp: &str, preferred: Codec) -> Option<Codec> {
    let offered: Vec<Codec> = sdp
        .lines()
        .find(|line| line.starts_with("m=audio"))
        .into_iter()
        .flat_map(|line| line.split_whitespace().skip(3))
        .filter_map(|token| token.parse::<u8>().ok())
        .filter_map(Codec::from_payload_type)
        .collect();

    if offered.contains(&preferred) {
        Some(preferred)
    } else {
        offered.into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiate_codec_prefers_configured_codec_when_both_offered() {
        let sdp = "v=0\r\nm=audio 40000 RTP/AVP 0 8\r\n";
        assert_eq!(negotiate_codec(sdp, Codec::Alaw), Some(Codec::Alaw));
        assert_eq!(negotiate_codec(sdp, Codec::Ulaw), Some(Codec::Ulaw));
    }

    #[test]
    fn negotiate_codec_falls_back_to_whatever_is_offered() {
        let sdp = "v=0\r\nm=audio 40000 RTP/AVP 0\r\n";
        assert_eq!(negotiate_codec(sdp, Codec::Alaw), Some(Codec::Ulaw));
    }

    #[test]
    fn negotiate_codec_none_when_unsupported() {
        let sdp = "v=0\r\nm=audio 40000 RTP/AVP 96\r\n";
        assert_eq!(negotiate_codec(sdp, Codec::Alaw), None);
    }
}
