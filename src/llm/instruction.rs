//! Instruction and VAD-mode types shared between the engine adapter
//! (C8) and the LLM client's sequencer (C5).

/// Which VAD configuration to request when transmitting an
/// instruction's `session.update`. The mapping from engine state to
/// this choice is supplied by the engine adapter, not hardcoded here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadMode {
    /// Standard server-side VAD: threshold 0.5, 300 ms prefix padding,
    /// 500 ms silence duration.
    Server,
    /// Semantic VAD, used while collecting free-form slots (address,
    /// name) where pauses mid-utterance shouldn't trigger a turn end.
    Semantic,
}

/// One unit of work the engine adapter hands to the LLM client: new
/// instructions for the model, plus whether they should provoke a
/// spoken response.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub text: String,
    pub vad_mode: VadMode,
    /// If true, the instruction updates context only — no
    /// `response.create` follows it.
    pub silent: bool,
}

impl Instruction {
    pub fn new(text: impl Into<String>, vad_mode: VadMode) -> Self {
        Self {
            text: text.into(),
            vad_mode,
            silent: false,
        }
    }

    pub fn silent(text: impl Into<String>, vad_mode: VadMode) -> Self {
        Self {
            text: text.into(),
            vad_mode,
            silent: true,
        }
    }
}

/// Wraps free-form engine instruction text in the hardened template
/// the model is asked to follow verbatim, per the fixed wire contract
/// between engine and client.
pub fn wrap_instruction(instruction: &str, anti_greeting: bool) -> String {
    let anti_greeting_clause = if anti_greeting {
        "\n- Do NOT greet the caller again; this is a continuation of the call."
    } else {
        ""
    };

    format!(
        "CRITICAL EXECUTION MODE:\n\
         - Follow the [INSTRUCTION] below exactly.\n\
         - Ask ONLY what the instruction asks for in this turn.\n\
         - Do NOT confirm booking, dispatch taxi, end call, or summarize unless explicitly instructed.\n\
         - Do NOT invent or normalize addresses/numbers.\n\
         - Keep to one concise response, then wait.{anti_greeting_clause}\n\n\
         <INSTRUCTION>\n{instruction}"
    )
}
