//! System prompt helpers for multi-persona runs.

/// Preamble prepended to persona instructions so the model understands
/// the handoff mechanism.
///
/// Transfers are exposed to the model as functions named
/// `transfer_to_<persona_id>`; the preamble tells it to treat them as
/// seamless and never to mention them to the user.
pub const HANDOFF_PREAMBLE: &str = "# System context\n\
You are part of a multi-agent system. The system supports two primary \
abstractions: assistants and handoffs. An assistant encompasses \
instructions and tools, and can hand a conversation off to another \
assistant when appropriate. Handoffs are performed by calling a handoff \
function, generally named `transfer_to_<assistant_name>`. Transfers \
between assistants are handled seamlessly in the background; do not \
mention or draw attention to them in your conversation with the user.\n";

/// Prefixes persona instructions with [`HANDOFF_PREAMBLE`].
pub fn with_handoff_instructions(instructions: &str) -> String {
    format!("{HANDOFF_PREAMBLE}\n{instructions}")
}
