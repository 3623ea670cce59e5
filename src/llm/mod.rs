//! LLM Streaming Client (C5): WebSocket connection, event dispatch,
//! and instruction sequencing for one call's conversation with the
//! streaming LLM service.

pub mod client;
pub mod events;
pub mod instruction;
pub mod sequencer;

pub use client::{LlmClient, LlmClientEvents, SessionParams};
pub use instruction::{wrap_instruction, Instruction, VadMode};
