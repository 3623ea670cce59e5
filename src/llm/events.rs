//! Downstream event shapes for the LLM realtime WebSocket protocol.
//!
//! Tagged enum deserialization (`#[serde(tag = "type")]`) over the
//! event stream; the tag values are dotted event names so
//! `rename_all` can't produce them — each variant gets an explicit
//! `rename`.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum DownstreamEvent {
    #[serde(rename = "session.created")]
    SessionCreated,

    #[serde(rename = "session.updated")]
    SessionUpdated,

    #[serde(rename = "response.created")]
    ResponseCreated,

    #[serde(rename = "response.audio.started")]
    ResponseAudioStarted,

    #[serde(rename = "response.audio.delta")]
    ResponseAudioDelta { delta: String },

    #[serde(rename = "response.audio.done")]
    ResponseAudioDone,

    #[serde(rename = "response.audio_transcript.done")]
    ResponseAudioTranscriptDone { transcript: String },

    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    CallerTranscriptionCompleted { transcript: String },

    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,

    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,

    #[serde(rename = "response.canceled")]
    ResponseCanceled,

    #[serde(rename = "error")]
    Error { error: LlmError },

    /// Catch-all for events the client doesn't act on; logged at debug
    /// rather than treated as a parse failure.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmError {
    pub message: String,
}

/// Error strings the far end returns for races we deliberately cause
/// (e.g. canceling a response that already finished). These are
/// swallowed rather than logged as faults.
pub const KNOWN_BENIGN_ERRORS: &[&str] = &["no active response found", "buffer too small"];

pub fn is_known_benign(message: &str) -> bool {
    KNOWN_BENIGN_ERRORS
        .iter()
        .any(|known| message.contains(known))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_audio_delta() {
        let json = r#"{"type":"response.audio.delta","delta":"AAAA"}"#;
        let event: DownstreamEvent = serde_json::from_str(json).unwrap();
        matches!(event, DownstreamEvent::ResponseAudioDelta { .. });
    }

    #[test]
    fn unrecognized_type_is_unknown_not_an_error() {
        let json = r#"{"type":"rate_limits.updated"}"#;
        let event: DownstreamEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, DownstreamEvent::Unknown));
    }

    #[test]
    fn known_benign_error_detected() {
        assert!(is_known_benign("no active response found for cancel"));
        assert!(is_known_benign("buffer too small to decode"));
        assert!(!is_known_benign("internal server error"));
    }
}
