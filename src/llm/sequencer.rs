//! Instruction sequencer: races a `response.canceled` event against a
//! 300 ms fallback timer so that exactly one side transmits the
//! pending instruction.
//!
//! An atomic-swap "first writer wins, second is a no-op" race, same
//! shape as a one-shot callback guard but generalized from a boolean
//! latch to an `Option<Instruction>` swap since the value being raced
//! is the instruction content itself, not just a fired/not-fired bit.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::instruction::Instruction;

const FALLBACK_TIMER_MS: u64 = 300;

/// Transmits a won instruction. Implemented by the LLM client: sends
/// `session.update` with the instruction's VAD mode, then (unless
/// `silent`) a wrapped `response.create`.
pub trait InstructionTransmitter: Send + Sync {
    fn transmit(&self, instruction: Instruction);
    fn send_cancel(&self);
}

pub struct Sequencer<T: InstructionTransmitter> {
    pending: Mutex<Option<Instruction>>,
    transmitter: Arc<T>,
}

impl<T: InstructionTransmitter + 'static> Sequencer<T> {
    pub fn new(transmitter: Arc<T>) -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(None),
            transmitter,
        })
    }

    /// `on_instruction`: store the instruction (superseding any prior
    /// pending one), send `response.cancel`, and arm the fallback
    /// timer.
    pub fn on_instruction(self: &Arc<Self>, instruction: Instruction) {
        *self.pending.lock() = Some(instruction);
        self.transmitter.send_cancel();

        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(FALLBACK_TIMER_MS)).await;
            this.try_transmit_pending();
        });
    }

    /// Called when `response.canceled` arrives downstream. Races
    /// against the fallback timer above; whichever fires first wins.
    pub fn on_response_canceled(&self) {
        self.try_transmit_pending();
    }

    /// Proactively cancel on `speech_stopped`, independent of any
    /// pending instruction — the VAD cancel race described in §4.5.
    pub fn cancel_for_vad(&self) {
        self.transmitter.send_cancel();
    }

    fn try_transmit_pending(&self) {
        let won = self.pending.lock().take();
        if let Some(instruction) = won {
            self.transmitter.transmit(instruction);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::instruction::VadMode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingTransmitter {
        transmitted: Mutex<Vec<String>>,
        cancels: AtomicUsize,
    }

    impl RecordingTransmitter {
        fn new() -> Self {
            Self {
                transmitted: Mutex::new(Vec::new()),
                cancels: AtomicUsize::new(0),
            }
        }
    }

    impl InstructionTransmitter for RecordingTransmitter {
        fn transmit(&self, instruction: Instruction) {
            self.transmitted.lock().push(instruction.text);
        }

        fn send_cancel(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn response_canceled_wins_transmits_exactly_once() {
        let transmitter = Arc::new(RecordingTransmitter::new());
        let sequencer = Sequencer::new(transmitter.clone());

        sequencer.on_instruction(Instruction::new("ask for name", VadMode::Server));
        sequencer.on_response_canceled();

        // Let the fallback timer task, if it still runs, observe an
        // already-empty pending slot.
        tokio::time::sleep(Duration::from_millis(320)).await;

        assert_eq!(transmitter.transmitted.lock().len(), 1);
        assert_eq!(transmitter.transmitted.lock()[0], "ask for name");
        assert_eq!(transmitter.cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fallback_timer_wins_when_no_cancel_event_arrives() {
        let transmitter = Arc::new(RecordingTransmitter::new());
        let sequencer = Sequencer::new(transmitter.clone());

        sequencer.on_instruction(Instruction::new("ask for address", VadMode::Semantic));
        tokio::time::sleep(Duration::from_millis(320)).await;

        assert_eq!(transmitter.transmitted.lock().len(), 1);
    }

    #[tokio::test]
    async fn superseding_instruction_overwrites_pending() {
        let transmitter = Arc::new(RecordingTransmitter::new());
        let sequencer = Sequencer::new(transmitter.clone());

        sequencer.on_instruction(Instruction::new("first", VadMode::Server));
        sequencer.on_instruction(Instruction::new("second", VadMode::Server));
        sequencer.on_response_canceled();

        tokio::time::sleep(Duration::from_millis(320)).await;

        let transmitted = transmitter.transmitted.lock();
        assert_eq!(transmitted.len(), 1);
        assert_eq!(transmitted[0], "second");
    }
}
