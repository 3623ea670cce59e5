//! Engine Adapter (C8): the trait boundary between this bridge's core
//! and an external dialogue engine. The engine's own business logic
//! (slot collection, geocoding, fare math, persistence, dispatch,
//! avatar/video) is explicitly out of scope here — this module only
//! defines the contract and a work-serializing actor around it.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::llm::{Instruction, VadMode};

pub mod default_engine;
pub use default_engine::DefaultEngine;

/// Events the engine fires back into the core. Plain closures, the
/// same event-hook shape used for `PlayoutEvents`/`MicGateEvents`.
pub struct EngineEvents {
    pub on_instruction: Box<dyn Fn(Instruction) + Send + Sync>,
    /// Fired when the engine has enough information to consider a
    /// booking complete; payload is an opaque summary, not a
    /// structured booking (that model lives outside this crate).
    pub on_booking_ready: Box<dyn Fn(String) + Send + Sync>,
    pub on_fare_ready: Box<dyn Fn(String) + Send + Sync>,
    pub on_hangup: Box<dyn Fn() + Send + Sync>,
}

/// Minimal contract an external dialogue engine must satisfy. All
/// methods are synchronous from the trait's point of view; the engine
/// may do whatever async work it needs internally, and the core never
/// calls these from its own receive loops directly (see `EngineActor`).
pub trait DialogueEngine: Send + Sync {
    fn start(&self, events: Arc<EngineEvents>);
    fn process_caller_transcript(&self, text: String);
    fn process_llm_transcript(&self, text: String);
    fn build_greeting(&self) -> String;
    fn system_prompt(&self) -> String;
    fn current_state_for_vad_selection(&self) -> VadMode;
    /// The core calls this once, on teardown, regardless of which side
    /// initiated it.
    fn end_call(&self, force: bool);
}

enum EngineCommand {
    Start,
    CallerTranscript(String),
    LlmTranscript(String),
    EndCall(bool),
}

/// Serializes calls into the engine onto one background task, so the
/// SIP/RTP/WebSocket receive loops never block on engine work.
pub struct EngineActor {
    commands: mpsc::UnboundedSender<EngineCommand>,
}

impl EngineActor {
    pub fn spawn(engine: Arc<dyn DialogueEngine>, events: Arc<EngineEvents>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<EngineCommand>();

        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    EngineCommand::Start => engine.start(events.clone()),
                    EngineCommand::CallerTranscript(text) => engine.process_caller_transcript(text),
                    EngineCommand::LlmTranscript(text) => engine.process_llm_transcript(text),
                    EngineCommand::EndCall(force) => {
                        engine.end_call(force);
                        break;
                    }
                }
            }
        });

        Self { commands: tx }
    }

    pub fn start(&self) {
        let _ = self.commands.send(EngineCommand::Start);
    }

    pub fn caller_transcript(&self, text: String) {
        let _ = self.commands.send(EngineCommand::CallerTranscript(text));
    }

    pub fn llm_transcript(&self, text: String) {
        let _ = self.commands.send(EngineCommand::LlmTranscript(text));
    }

    pub fn end_call(&self, force: bool) {
        let _ = self.commands.send(EngineCommand::EndCall(force));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct RecordingEngine {
        caller_transcripts: Mutex<Vec<String>>,
        ended: AtomicUsize,
    }

    impl DialogueEngine for RecordingEngine {
        fn start(&self, _events: Arc<EngineEvents>) {}

        fn process_caller_transcript(&self, text: String) {
            self.caller_transcripts.lock().unwrap().push(text);
        }

        fn process_llm_transcript(&self, _text: String) {}

        fn build_greeting(&self) -> String {
            "hello".to_string()
        }

        fn system_prompt(&self) -> String {
            "you are a dispatcher".to_string()
        }

        fn current_state_for_vad_selection(&self) -> VadMode {
            VadMode::Server
        }

        fn end_call(&self, _force: bool) {
            self.ended.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn no_op_events() -> Arc<EngineEvents> {
        Arc::new(EngineEvents {
            on_instruction: Box::new(|_| {}),
            on_booking_ready: Box::new(|_| {}),
            on_fare_ready: Box::new(|_| {}),
            on_hangup: Box::new(|| {}),
        })
    }

    #[tokio::test]
    async fn serializes_caller_transcripts_in_order() {
        let engine = Arc::new(RecordingEngine {
            caller_transcripts: Mutex::new(Vec::new()),
            ended: AtomicUsize::new(0),
        });
        let actor = EngineActor::spawn(engine.clone(), no_op_events());

        actor.caller_transcript("one".to_string());
        actor.caller_transcript("two".to_string());
        actor.end_call(false);

        // Give the background task a chance to drain.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(
            engine.caller_transcripts.lock().unwrap().clone(),
            vec!["one".to_string(), "two".to_string()]
        );
        assert_eq!(engine.ended.load(Ordering::SeqCst), 1);
    }
}
