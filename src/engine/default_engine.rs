//! A minimal reference `DialogueEngine` implementation used when no
//! external engine is configured. It only greets the caller and echoes
//! a clarifying prompt back — booking/fare/address logic is out of
//! scope for this crate (see C8's trait boundary) and belongs to a
//! real engine implementation supplied by the embedder.

use std::sync::Arc;
use std::sync::Mutex;

use crate::engine::{DialogueEngine, EngineEvents};
use crate::llm::{Instruction, VadMode};

pub struct DefaultEngine {
    greeting: String,
    system_prompt: String,
    events: Mutex<Option<Arc<EngineEvents>>>,
}

impl DefaultEngine {
    pub fn new(greeting: impl Into<String>, system_prompt: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            greeting: greeting.into(),
            system_prompt: system_prompt.into(),
            events: Mutex::new(None),
        })
    }
}

impl DialogueEngine for DefaultEngine {
    fn start(&self, events: Arc<EngineEvents>) {
        *self.events.lock().unwrap() = Some(events);
    }

    fn process_caller_transcript(&self, text: String) {
        let events = self.events.lock().unwrap();
        if let Some(events) = events.as_ref() {
            let prompt = format!("The caller said: \"{text}\". Ask one clarifying question.");
            (events.on_instruction)(Instruction::new(prompt, VadMode::Server));
        }
    }

    fn process_llm_transcript(&self, _text: String) {}

    fn build_greeting(&self) -> String {
        self.greeting.clone()
    }

    fn system_prompt(&self) -> String {
        self.system_prompt.clone()
    }

    fn current_state_for_vad_selection(&self) -> VadMode {
        VadMode::Server
    }

    fn end_call(&self, _force: bool) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn emits_instruction_after_start_on_caller_transcript() {
        let engine = DefaultEngine::new("hi", "you are helpful");
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        engine.start(Arc::new(EngineEvents {
            on_instruction: Box::new(move |_| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            }),
            on_booking_ready: Box::new(|_| {}),
            on_fare_ready: Box::new(|_| {}),
            on_hangup: Box::new(|| {}),
        }));

        engine.process_caller_transcript("I need a ride".to_string());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn no_instruction_before_start() {
        let engine = DefaultEngine::new("hi", "you are helpful");
        engine.process_caller_transcript("hello".to_string());
        // No panic, no events registered yet — nothing to assert beyond
        // the fact that this doesn't crash.
    }
}
