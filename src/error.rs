//! Error taxonomy for the bridge.
//!
//! Fallible I/O/construction paths return `Result<T, String>` — no
//! `thiserror`/`anyhow` wrapping, just `.map_err(|e| format!(".. {e}"))`.
//! `CallEndCause` is the one closed type: every call ends for exactly
//! one reason, recorded here.

use std::fmt;

/// Why a call was torn down. Exactly one of these is recorded per call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEndCause {
    /// Far side sent BYE.
    Bye,
    /// No inbound RTP for the configured timeout.
    RtpTimeout,
    /// Outbound RTP circuit breaker tripped.
    CircuitBreakerTripped,
    /// The dialogue engine asked to end the call.
    EngineHangup,
    /// SIP INVITE/codec negotiation failed before a call was created.
    SetupFailed(String),
    /// The LLM WebSocket closed unexpectedly.
    WebSocketClosed,
}

impl fmt::Display for CallEndCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallEndCause::Bye => write!(f, "bye"),
            CallEndCause::RtpTimeout => write!(f, "rtp_timeout"),
            CallEndCause::CircuitBreakerTripped => write!(f, "rtp_circuit_tripped"),
            CallEndCause::EngineHangup => write!(f, "engine_hangup"),
            CallEndCause::SetupFailed(reason) => write!(f, "setup_failed: {reason}"),
            CallEndCause::WebSocketClosed => write!(f, "websocket_closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cause_strings_match_spec() {
        assert_eq!(CallEndCause::RtpTimeout.to_string(), "rtp_timeout");
        assert_eq!(
            CallEndCause::CircuitBreakerTripped.to_string(),
            "rtp_circuit_tripped"
        );
    }
}
