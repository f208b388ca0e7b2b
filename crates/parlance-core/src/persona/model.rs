//! Persona domain model.
//!
//! Represents AI personas that handle conversation turns. Each persona has
//! instructions, optional handoff targets, and tool bindings. The
//! conversation driver never inspects persona configuration; it only
//! carries an opaque [`PersonaId`] that the runner resolves and updates.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque handle identifying a persona.
///
/// From the driver's perspective this is a capability supplied by the
/// runner: the driver stores the id returned from the last delegation and
/// passes it back unchanged on the next one. Only runner implementations
/// resolve it to a concrete [`Persona`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersonaId(String);

impl PersonaId {
    /// Creates a new persona id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PersonaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PersonaId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PersonaId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A persona representing an AI agent variant with specific instructions.
///
/// Personas are static configuration consumed by runner implementations.
/// A persona may declare handoff targets: other personas it can transfer
/// turn-handling responsibility to mid-run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    /// Unique identifier
    pub id: PersonaId,
    /// Display name of the persona
    pub name: String,
    /// System instructions given to the model
    pub instructions: String,
    /// Short description shown to other personas deciding whether to hand
    /// off to this one
    #[serde(default)]
    pub handoff_description: Option<String>,
    /// Personas this one may hand the conversation off to
    #[serde(default)]
    pub handoffs: Vec<PersonaId>,
    /// Names of tools this persona may call
    #[serde(default)]
    pub tools: Vec<String>,
    /// Model override; falls back to the runner default when absent
    #[serde(default)]
    pub model: Option<String>,
}

impl Persona {
    /// Creates a persona with the given id, name, and instructions.
    pub fn new(
        id: impl Into<PersonaId>,
        name: impl Into<String>,
        instructions: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            instructions: instructions.into(),
            handoff_description: None,
            handoffs: Vec::new(),
            tools: Vec::new(),
            model: None,
        }
    }

    /// Sets the handoff description.
    pub fn with_handoff_description(mut self, description: impl Into<String>) -> Self {
        self.handoff_description = Some(description.into());
        self
    }

    /// Adds a handoff target.
    pub fn with_handoff(mut self, target: impl Into<PersonaId>) -> Self {
        self.handoffs.push(target.into());
        self
    }

    /// Adds a tool binding by name.
    pub fn with_tool(mut self, tool_name: impl Into<String>) -> Self {
        self.tools.push(tool_name.into());
        self
    }

    /// Overrides the model for this persona.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}
