//! Frame Accumulator (C2): slices an arbitrary byte stream from the LLM
//! into fixed 160-byte G.711 frames for the playout queue.
//!
//! A growable buffer feeding fixed-size output units with an overflow
//! guard, simplified down to a plain FIFO since the upstream audio
//! arrives already in order — no reordering, just framing and
//! backpressure.

use std::collections::VecDeque;

pub const FRAME_SIZE: usize = 160;
const MAX_ACCUMULATOR_BYTES: usize = 65536;
const MAX_QUEUE_FRAMES: usize = 2000;

/// Buffers inbound bytes and produces fixed-size frames onto a bounded
/// queue. Single-writer; callers serialize access with one mutex (see
/// `playout::Playout`, which owns one of these behind a lock).
pub struct FrameAccumulator {
    residue: Vec<u8>,
    queue: VecDeque<[u8; FRAME_SIZE]>,
    silence_byte: u8,
}

impl FrameAccumulator {
    pub fn new(silence_byte: u8) -> Self {
        Self {
            residue: Vec::with_capacity(FRAME_SIZE * 2),
            queue: VecDeque::new(),
            silence_byte,
        }
    }

    /// Append bytes, slicing off as many complete 160-byte frames as
    /// possible into the downstream queue. If `residue` would exceed
    /// the 64 KiB cap, the new input is truncated to fit — the
    /// overflow guard is input-side, not a crash.
    pub fn push(&mut self, bytes: &[u8]) {
        let room = MAX_ACCUMULATOR_BYTES.saturating_sub(self.residue.len());
        let bytes = if bytes.len() > room {
            &bytes[..room]
        } else {
            bytes
        };
        self.residue.extend_from_slice(bytes);

        let mut offset = 0;
        while self.residue.len() - offset >= FRAME_SIZE {
            let mut frame = [0u8; FRAME_SIZE];
            frame.copy_from_slice(&self.residue[offset..offset + FRAME_SIZE]);
            self.enqueue(frame);
            offset += FRAME_SIZE;
        }
        self.residue.drain(..offset);

        debug_assert!(self.residue.len() < FRAME_SIZE);
    }

    /// Pad any partial frame with silence and enqueue it once, then
    /// clear the accumulator. A no-op if nothing is buffered.
    pub fn flush(&mut self) {
        if self.residue.is_empty() {
            return;
        }
        let mut frame = [self.silence_byte; FRAME_SIZE];
        frame[..self.residue.len()].copy_from_slice(&self.residue);
        self.enqueue(frame);
        self.residue.clear();
    }

    /// Drop all buffered bytes and queued frames.
    pub fn clear(&mut self) {
        self.residue.clear();
        self.queue.clear();
    }

    pub fn dequeue(&mut self) -> Option<[u8; FRAME_SIZE]> {
        self.queue.pop_front()
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    fn enqueue(&mut self, frame: [u8; FRAME_SIZE]) {
        if self.queue.len() >= MAX_QUEUE_FRAMES {
            self.queue.pop_front();
        }
        self.queue.push_back(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_emits_complete_frames_and_keeps_residue_under_frame_size() {
        let mut acc = FrameAccumulator::new(0xD5);
        acc.push(&[1u8; 350]);
        assert_eq!(acc.queue_depth(), 2);
        assert!(acc.residue.len() < FRAME_SIZE);
        assert_eq!(acc.residue.len(), 30);
    }

    #[test]
    fn flush_pads_partial_frame_with_silence() {
        let mut acc = FrameAccumulator::new(0xD5);
        acc.push(&[7u8; 100]);
        acc.flush();
        assert_eq!(acc.queue_depth(), 1);
        let frame = acc.dequeue().unwrap();
        assert_eq!(&frame[..100], &[7u8; 100][..]);
        assert!(frame[100..].iter().all(|&b| b == 0xD5));
    }

    #[test]
    fn flush_on_empty_residue_is_noop() {
        let mut acc = FrameAccumulator::new(0xFF);
        acc.flush();
        assert_eq!(acc.queue_depth(), 0);
    }

    #[test]
    fn clear_drops_everything() {
        let mut acc = FrameAccumulator::new(0xD5);
        acc.push(&[1u8; 500]);
        acc.clear();
        assert_eq!(acc.queue_depth(), 0);
        assert_eq!(acc.residue.len(), 0);
    }

    #[test]
    fn queue_overflow_drops_oldest() {
        let mut acc = FrameAccumulator::new(0xD5);
        for i in 0..(MAX_QUEUE_FRAMES + 10) {
            acc.push(&[(i % 256) as u8; FRAME_SIZE]);
        }
        assert_eq!(acc.queue_depth(), MAX_QUEUE_FRAMES);
    }
}
