//! Mic Gate (C4): coordinates inbound caller audio against the
//! playout engine's state so the caller is never forwarded to the LLM
//! while the LLM's own response is still being spoken.
//!
//! This is a synchronous dual-latch state machine (no timers): the
//! gate opens the instant both `responseCompleted` and `playoutDrained`
//! are true. A resettable pair of latches plus a bounded echo-tail
//! ring, rather than a one-shot fired/not-fired flag.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

const ECHO_RING_CAPACITY: usize = 10;

struct Ring {
    frames: Vec<Vec<u8>>,
    next_write: usize,
}

impl Ring {
    fn new() -> Self {
        Self {
            frames: Vec::new(),
            next_write: 0,
        }
    }

    fn push(&mut self, frame: &[u8]) {
        if self.frames.len() < ECHO_RING_CAPACITY {
            self.frames.push(frame.to_vec());
            self.next_write = self.frames.len() % ECHO_RING_CAPACITY;
        } else {
            self.frames[self.next_write] = frame.to_vec();
            self.next_write = (self.next_write + 1) % ECHO_RING_CAPACITY;
        }
    }

    /// Drain in FIFO order (oldest first) and clear.
    fn drain_fifo(&mut self) -> Vec<Vec<u8>> {
        if self.frames.is_empty() {
            return Vec::new();
        }
        let start = if self.frames.len() == ECHO_RING_CAPACITY {
            self.next_write
        } else {
            0
        };
        let mut out = Vec::with_capacity(self.frames.len());
        for i in 0..self.frames.len() {
            out.push(self.frames[(start + i) % self.frames.len()].clone());
        }
        self.frames.clear();
        self.next_write = 0;
        out
    }

    fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

struct State {
    gated: bool,
    response_completed: bool,
    playout_drained: bool,
    ring: Ring,
}

/// Hooks fired by the gate. `forward_upstream` is how opened/flushed
/// audio reaches the LLM client; `on_barge_in` notifies observers.
pub struct MicGateEvents {
    pub forward_upstream: Box<dyn Fn(&[u8]) + Send + Sync>,
    pub on_barge_in: Box<dyn Fn() + Send + Sync>,
}

/// Shared mic gate for one call.
pub struct MicGate {
    state: Mutex<State>,
    latest_task_id: AtomicU64,
    gated_flag: AtomicBool,
    events: MicGateEvents,
}

impl MicGate {
    pub fn new(events: MicGateEvents) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                gated: true,
                response_completed: false,
                playout_drained: false,
                ring: Ring::new(),
            }),
            latest_task_id: AtomicU64::new(0),
            gated_flag: AtomicBool::new(true),
            events,
        })
    }

    pub fn is_gated(&self) -> bool {
        self.gated_flag.load(Ordering::Acquire)
    }

    /// Whether the current response has finished streaming audio —
    /// used by the call session's drain-aware hangup to know when it's
    /// safe to stop waiting on the LLM side.
    pub fn response_completed(&self) -> bool {
        self.state.lock().response_completed
    }

    pub fn latest_task_id(&self) -> u64 {
        self.latest_task_id.load(Ordering::Acquire)
    }

    /// `arm`: a new response has started. Reset latches and bump the
    /// task id so any in-flight ungate from a stale response is
    /// superseded.
    pub fn arm(&self) {
        let mut state = self.state.lock();
        state.gated = true;
        state.response_completed = false;
        state.playout_drained = false;
        self.gated_flag.store(true, Ordering::Release);
        self.latest_task_id.fetch_add(1, Ordering::AcqRel);
    }

    /// `audio_done`: the LLM finished streaming this response's audio.
    pub fn audio_done(&self) {
        let mut state = self.state.lock();
        state.response_completed = true;
        self.maybe_open(&mut state);
    }

    /// `playout_drained`: the playout engine emptied its queue.
    pub fn playout_drained(&self) {
        let mut state = self.state.lock();
        state.playout_drained = true;
        self.maybe_open(&mut state);
    }

    fn maybe_open(&self, state: &mut State) {
        if state.response_completed && state.playout_drained && state.gated {
            state.gated = false;
            self.gated_flag.store(false, Ordering::Release);
            let drained = state.ring.drain_fifo();
            for frame in drained {
                (self.events.forward_upstream)(&frame);
            }
        }
    }

    /// `barge_in`: caller started speaking while gated. Immediate cut:
    /// the caller's own playout should already be cleared by the
    /// session wiring this into `Playout::clear`; here we just open the
    /// gate and drop the echo ring without replaying it upstream (it's
    /// the bridge's own TTS echo, not caller speech).
    pub fn barge_in(&self) {
        let mut state = self.state.lock();
        state.gated = false;
        state.response_completed = false;
        state.playout_drained = false;
        state.ring = Ring::new();
        self.gated_flag.store(false, Ordering::Release);
        self.latest_task_id.fetch_add(1, Ordering::AcqRel);
        drop(state);
        (self.events.on_barge_in)();
    }

    /// Route one inbound RTP audio payload: forward upstream if open,
    /// otherwise capture into the echo-tail ring.
    pub fn handle_inbound(&self, payload: &[u8]) {
        if self.is_gated() {
            self.state.lock().ring.push(payload);
        } else {
            (self.events.forward_upstream)(payload);
        }
    }

    #[cfg(test)]
    fn ring_is_empty(&self) -> bool {
        self.state.lock().ring.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_events() -> (MicGateEvents, Arc<AtomicUsize>, Arc<Mutex<Vec<Vec<u8>>>>) {
        let barge_count = Arc::new(AtomicUsize::new(0));
        let forwarded = Arc::new(Mutex::new(Vec::new()));
        let barge_clone = barge_count.clone();
        let forwarded_clone = forwarded.clone();
        let events = MicGateEvents {
            forward_upstream: Box::new(move |frame| forwarded_clone.lock().push(frame.to_vec())),
            on_barge_in: Box::new(move || {
                barge_clone.fetch_add(1, Ordering::SeqCst);
            }),
        };
        (events, barge_count, forwarded)
    }

    #[test]
    fn starts_gated() {
        let (events, _, _) = counting_events();
        let gate = MicGate::new(events);
        assert!(gate.is_gated());
    }

    #[test]
    fn closed_gate_captures_into_ring_not_upstream() {
        let (events, _, forwarded) = counting_events();
        let gate = MicGate::new(events);
        gate.handle_inbound(&[1u8; 160]);
        assert!(forwarded.lock().is_empty());
        assert!(!gate.ring_is_empty());
    }

    #[test]
    fn opens_only_when_both_latches_set() {
        let (events, _, forwarded) = counting_events();
        let gate = MicGate::new(events);
        gate.handle_inbound(&[9u8; 160]);

        gate.audio_done();
        assert!(gate.is_gated());

        gate.playout_drained();
        assert!(!gate.is_gated());
        // Ring should have been flushed upstream in FIFO order.
        assert_eq!(forwarded.lock().len(), 1);
        assert_eq!(forwarded.lock()[0], vec![9u8; 160]);
    }

    #[test]
    fn open_gate_forwards_directly() {
        let (events, _, forwarded) = counting_events();
        let gate = MicGate::new(events);
        gate.audio_done();
        gate.playout_drained();
        assert!(!gate.is_gated());

        gate.handle_inbound(&[2u8; 160]);
        assert_eq!(forwarded.lock().len(), 1);
    }

    #[test]
    fn barge_in_opens_immediately_and_bumps_task_id() {
        let (events, barge_count, _) = counting_events();
        let gate = MicGate::new(events);
        let task_before = gate.latest_task_id();

        gate.barge_in();

        assert!(!gate.is_gated());
        assert!(gate.ring_is_empty());
        assert_eq!(barge_count.load(Ordering::SeqCst), 1);
        assert!(gate.latest_task_id() > task_before);
    }

    #[test]
    fn arm_re_gates_and_bumps_task_id() {
        let (events, _, _) = counting_events();
        let gate = MicGate::new(events);
        gate.audio_done();
        gate.playout_drained();
        assert!(!gate.is_gated());

        let task_before = gate.latest_task_id();
        gate.arm();
        assert!(gate.is_gated());
        assert!(gate.latest_task_id() > task_before);
    }

    #[test]
    fn ring_overflow_keeps_only_last_10_frames_fifo() {
        let (events, _, forwarded) = counting_events();
        let gate = MicGate::new(events);
        for i in 0..15u8 {
            gate.handle_inbound(&[i; 4]);
        }
        gate.audio_done();
        gate.playout_drained();

        let out = forwarded.lock();
        assert_eq!(out.len(), ECHO_RING_CAPACITY);
        // Oldest surviving frame should be #5 (15 pushes, capacity 10).
        assert_eq!(out[0], vec![5u8; 4]);
        assert_eq!(out[ECHO_RING_CAPACITY - 1], vec![14u8; 4]);
    }
}
