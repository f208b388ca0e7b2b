//! Preset persona configurations.

use parlance_core::Persona;

use crate::prompt::with_handoff_instructions;

/// The primary persona that handles new sessions.
///
/// Calls the weather tool when asked about the weather and hands off to
/// the English persona when the user speaks Urdu.
pub fn assistant_persona() -> Persona {
    Persona::new(
        "assistant",
        "Assistant",
        with_handoff_instructions(
            "You're speaking to a human, so be polite and concise. \
             If the user speaks in Urdu, handoff to the english agent.",
        ),
    )
    .with_handoff("english")
    .with_tool("get_weather")
}

/// English-speaking persona available as a handoff target.
pub fn english_persona() -> Persona {
    Persona::new(
        "english",
        "English",
        with_handoff_instructions(
            "You're speaking to a human, so be polite and concise. Speak in English.",
        ),
    )
    .with_handoff_description("A english speaking agent.")
}

/// Returns the preset personas, primary persona first.
pub fn default_personas() -> Vec<Persona> {
    vec![assistant_persona(), english_persona()]
}
