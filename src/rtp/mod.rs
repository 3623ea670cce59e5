//! RTP transport: header codec, per-call socket, frame accumulator, and
//! the paced playout engine (C2 + C3).

pub mod accumulator;
pub mod header;
pub mod playout;
pub mod socket;

pub use accumulator::FrameAccumulator;
pub use header::{RtpHeader, RtpPacket, RtpPacketBuilder};
pub use playout::{Playout, PlayoutEvents};
pub use socket::RtpSocket;
