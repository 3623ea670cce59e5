//! Playout Engine (C3) — the beating heart of one call's outbound
//! audio: a paced task that emits exactly one RTP frame every 20 ms for
//! the call's lifetime, backed by the frame accumulator.
//!
//! The Buffering/Playing hysteresis is simplified from a
//! sequence-indexed jitter buffer (reordering out-of-sequence network
//! packets) down to a plain FIFO, since audio here arrives from the
//! LLM WebSocket client already in order. The `next_deadline += 20ms`
//! pacing loop and the consecutive-send-error circuit breaker mirror a
//! paced RTP transmitter thread.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::codec::Codec;
use crate::rtp::accumulator::{FrameAccumulator, FRAME_SIZE};
use crate::rtp::header::RtpPacketBuilder;
use crate::rtp::socket::RtpSocket;

const FRAME_MS: u64 = 20;
const INITIAL_START_THRESHOLD: usize = 10;
const RESUME_THRESHOLD: usize = 5;
const UNDERRUN_GRACE_FRAMES: u32 = 3;
const CLOCK_SLIP_RESYNC_MS: u64 = 100;
const KEEPALIVE_IDLE_SECS: u64 = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlayoutState {
    Buffering,
    Playing,
}

struct Inner {
    accumulator: FrameAccumulator,
    state: PlayoutState,
    has_played_once: bool,
    consecutive_underruns: u32,
    drain_fired: bool,
}

/// Event callbacks the engine fires during its lifetime. Plain `Fn`
/// closures rather than a trait, for call sites that only care about
/// one or two of the hooks.
pub struct PlayoutEvents {
    pub on_drained: Box<dyn Fn() + Send + Sync>,
    pub on_fault: Box<dyn Fn(String) + Send + Sync>,
    pub on_log: Box<dyn Fn(String) + Send + Sync>,
}

/// Handle to a running playout engine. Cloning shares the same
/// underlying task and queue. The socket is shared (not owned) so a
/// separate inbound-RTP receive loop can read from it concurrently
/// with this engine's sends.
#[derive(Clone)]
pub struct Playout {
    inner: Arc<Mutex<Inner>>,
    socket: Arc<RtpSocket>,
    codec: Codec,
    consecutive_send_errors: Arc<AtomicU32>,
    stopped: Arc<AtomicBool>,
    nat_learned: Arc<AtomicBool>,
    circuit_breaker_threshold: u32,
}

impl Playout {
    pub fn new(socket: Arc<RtpSocket>, codec: Codec, circuit_breaker_threshold: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                accumulator: FrameAccumulator::new(codec.silence_byte()),
                state: PlayoutState::Buffering,
                has_played_once: false,
                consecutive_underruns: 0,
                drain_fired: false,
            })),
            socket,
            codec,
            consecutive_send_errors: Arc::new(AtomicU32::new(0)),
            stopped: Arc::new(AtomicBool::new(false)),
            nat_learned: Arc::new(AtomicBool::new(false)),
            circuit_breaker_threshold,
        }
    }

    /// Push bytes from the LLM audio stream into the accumulator.
    pub fn buffer(&self, bytes: &[u8]) {
        self.inner.lock().accumulator.push(bytes);
    }

    /// Pad and enqueue any half-frame remainder.
    pub fn flush(&self) {
        self.inner.lock().accumulator.flush();
    }

    /// Barge-in / explicit clear: drop everything, return to Buffering
    /// with `has_played_once` reset, no drain event (this isn't an
    /// underrun).
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.accumulator.clear();
        inner.state = PlayoutState::Buffering;
        inner.has_played_once = false;
        inner.consecutive_underruns = 0;
        inner.drain_fired = false;
    }

    pub fn queue_depth(&self) -> usize {
        self.inner.lock().accumulator.queue_depth()
    }

    /// Record the caller's RTP endpoint on first inbound packet
    /// (symmetric RTP). Idempotent after the first call.
    pub fn learn_remote(&self, addr: SocketAddr) {
        if !self.nat_learned.swap(true, Ordering::SeqCst) {
            self.socket.set_remote(addr);
        }
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Run the 20 ms pacing loop until `stop()` is called or the
    /// circuit breaker trips. Intended to be spawned as its own task.
    pub async fn run(&self, events: PlayoutEvents) {
        let mut builder = RtpPacketBuilder::new(self.codec.payload_type());
        let frame_duration = Duration::from_millis(FRAME_MS);
        let silence_frame = [self.codec.silence_byte(); FRAME_SIZE];

        let mut next_deadline = Instant::now() + frame_duration;
        let mut last_send = Instant::now();

        loop {
            if self.stopped.load(Ordering::SeqCst) {
                return;
            }

            let now = Instant::now();
            if next_deadline > now {
                tokio::time::sleep(next_deadline - now).await;
            } else if now.duration_since(next_deadline) > Duration::from_millis(CLOCK_SLIP_RESYNC_MS)
            {
                // Clock slipped badly behind; resync instead of bursting
                // catch-up frames.
                next_deadline = now + frame_duration;
            }

            let frame = self.next_frame();
            let payload: &[u8] = frame.as_ref().unwrap_or(&silence_frame);
            let packet = builder.build_packet(payload, FRAME_SIZE as u32, false);

            // Once the remote is known, every tick sends real audio or a
            // silence frame unconditionally — that's what keeps the RTP
            // timestamp continuous and the caller's jitter buffer fed.
            // Before the remote is known there's nothing to send to, so
            // only attempt on the keepalive cadence (a no-op in `send`
            // either way, but this avoids spinning on every tick).
            let idle = Instant::now().duration_since(last_send) >= Duration::from_secs(KEEPALIVE_IDLE_SECS);
            if self.nat_learned.load(Ordering::SeqCst) || idle {
                match self.send(packet).await {
                    Ok(()) => {
                        self.consecutive_send_errors.store(0, Ordering::SeqCst);
                        last_send = Instant::now();
                    }
                    Err(e) => {
                        let errors = self.consecutive_send_errors.fetch_add(1, Ordering::SeqCst) + 1;
                        if errors == 1 || errors % 5 == 0 || errors % 10 == 0 {
                            (events.on_log)(format!("RTP send failed ({errors} consecutive): {e}"));
                        }
                        if errors >= self.circuit_breaker_threshold {
                            self.stop();
                            (events.on_fault)(format!(
                                "RTP circuit breaker tripped after {errors} consecutive send errors"
                            ));
                            return;
                        }
                    }
                }
            }

            next_deadline += frame_duration;
            self.check_drain(&events);
        }
    }

    async fn send(&self, packet: &[u8]) -> Result<(), String> {
        if self.socket.remote().is_none() {
            return Ok(());
        }
        self.socket.send(packet).await.map(|_| ())
    }

    /// Advance the state machine by one tick and return the frame to
    /// send, if any (`None` means emit silence).
    fn next_frame(&self) -> Option<[u8; FRAME_SIZE]> {
        let mut inner = self.inner.lock();
        match inner.state {
            PlayoutState::Buffering => {
                let threshold = if inner.has_played_once {
                    RESUME_THRESHOLD
                } else {
                    INITIAL_START_THRESHOLD
                };
                if inner.accumulator.queue_depth() >= threshold {
                    inner.state = PlayoutState::Playing;
                    inner.has_played_once = true;
                    inner.consecutive_underruns = 0;
                    inner.drain_fired = false;
                    inner.accumulator.dequeue()
                } else {
                    None
                }
            }
            PlayoutState::Playing => match inner.accumulator.dequeue() {
                Some(frame) => {
                    inner.consecutive_underruns = 0;
                    Some(frame)
                }
                None => {
                    inner.consecutive_underruns += 1;
                    if inner.consecutive_underruns >= UNDERRUN_GRACE_FRAMES {
                        inner.state = PlayoutState::Buffering;
                    }
                    None
                }
            },
        }
    }

    fn check_drain(&self, events: &PlayoutEvents) {
        let mut inner = self.inner.lock();
        let should_fire = inner.state == PlayoutState::Buffering
            && inner.consecutive_underruns >= UNDERRUN_GRACE_FRAMES
            && !inner.drain_fired;
        if should_fire {
            inner.drain_fired = true;
            drop(inner);
            (events.on_drained)();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32 as StdAtomicU32;

    fn no_op_events() -> PlayoutEvents {
        PlayoutEvents {
            on_drained: Box::new(|| {}),
            on_fault: Box::new(|_| {}),
            on_log: Box::new(|_| {}),
        }
    }

    async fn local_pair() -> (RtpSocket, RtpSocket) {
        let a = RtpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let b = RtpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        (a, b)
    }

    #[tokio::test]
    async fn stays_buffering_below_initial_threshold() {
        let (a, _b) = local_pair().await;
        let playout = Playout::new(Arc::new(a), Codec::Alaw, 100);
        for _ in 0..(INITIAL_START_THRESHOLD - 1) {
            playout.buffer(&[1u8; FRAME_SIZE]);
        }
        assert!(playout.next_frame().is_none());
    }

    #[tokio::test]
    async fn enters_playing_at_initial_threshold() {
        let (a, _b) = local_pair().await;
        let playout = Playout::new(Arc::new(a), Codec::Alaw, 100);
        for _ in 0..INITIAL_START_THRESHOLD {
            playout.buffer(&[1u8; FRAME_SIZE]);
        }
        let frame = playout.next_frame();
        assert!(frame.is_some());
        assert_eq!(playout.inner.lock().state, PlayoutState::Playing);
    }

    #[tokio::test]
    async fn resume_threshold_is_lower_after_first_play() {
        let (a, _b) = local_pair().await;
        let playout = Playout::new(Arc::new(a), Codec::Alaw, 100);
        for _ in 0..INITIAL_START_THRESHOLD {
            playout.buffer(&[1u8; FRAME_SIZE]);
        }
        playout.next_frame();
        // Drain to empty, force back to Buffering via underrun grace.
        for _ in 0..(UNDERRUN_GRACE_FRAMES as usize) {
            playout.next_frame();
        }
        assert_eq!(playout.inner.lock().state, PlayoutState::Buffering);

        for _ in 0..RESUME_THRESHOLD {
            playout.buffer(&[1u8; FRAME_SIZE]);
        }
        let frame = playout.next_frame();
        assert!(frame.is_some());
        assert_eq!(playout.inner.lock().state, PlayoutState::Playing);
    }

    #[tokio::test]
    async fn underrun_grace_then_rebuffer_fires_drain_once() {
        let (a, _b) = local_pair().await;
        let playout = Playout::new(Arc::new(a), Codec::Alaw, 100);
        for _ in 0..INITIAL_START_THRESHOLD {
            playout.buffer(&[1u8; FRAME_SIZE]);
        }
        playout.next_frame();

        let fired = Arc::new(StdAtomicU32::new(0));
        let fired_clone = fired.clone();
        let events = PlayoutEvents {
            on_drained: Box::new(move || {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            }),
            on_fault: Box::new(|_| {}),
            on_log: Box::new(|_| {}),
        };

        for _ in 0..(UNDERRUN_GRACE_FRAMES as usize + 2) {
            playout.next_frame();
            playout.check_drain(&events);
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn clear_resets_to_buffering_without_drain() {
        let (a, _b) = local_pair().await;
        let playout = Playout::new(Arc::new(a), Codec::Alaw, 100);
        for _ in 0..INITIAL_START_THRESHOLD {
            playout.buffer(&[1u8; FRAME_SIZE]);
        }
        playout.next_frame();
        playout.clear();
        assert_eq!(playout.inner.lock().state, PlayoutState::Buffering);
        assert!(!playout.inner.lock().has_played_once);
        assert_eq!(playout.queue_depth(), 0);
    }

    #[tokio::test]
    async fn learn_remote_is_idempotent() {
        let (a, _b) = local_pair().await;
        let playout = Playout::new(Arc::new(a), Codec::Alaw, 100);
        let addr1: SocketAddr = "127.0.0.1:1111".parse().unwrap();
        let addr2: SocketAddr = "127.0.0.1:2222".parse().unwrap();
        playout.learn_remote(addr1);
        playout.learn_remote(addr2);
        assert_eq!(playout.socket.remote(), Some(addr1));
    }

    #[tokio::test]
    async fn sends_silence_unconditionally_once_remote_is_known() {
        let (a, b) = local_pair().await;
        let b_addr = b.local_addr().unwrap();
        let playout = Playout::new(Arc::new(a), Codec::Alaw, 100);
        playout.learn_remote(b_addr);

        let run_playout = playout.clone();
        let handle = tokio::spawn(async move {
            run_playout.run(no_op_events()).await;
        });

        // No real audio was ever buffered, so the engine stays in
        // Buffering for its whole life — every one of these packets is
        // a silence frame, not real audio.
        let mut buf = [0u8; 2048];
        for _ in 0..3 {
            let (len, _) = tokio::time::timeout(Duration::from_millis(200), b.recv(&mut buf))
                .await
                .expect("expected a silence packet on every tick")
                .unwrap();
            assert_eq!(len, 12 + FRAME_SIZE);
        }

        playout.stop();
        let _ = tokio::time::timeout(Duration::from_millis(200), handle).await;
    }

    #[test]
    fn no_op_events_builds() {
        let _ = no_op_events();
    }
}
