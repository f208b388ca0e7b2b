//! Conversation turn types.
//!
//! This module contains types for representing turns in a conversation,
//! including roles and turn content.

use serde::{Deserialize, Serialize};

/// Represents the role of a turn in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    /// Turn from the user.
    User,
    /// Turn from the AI assistant.
    Assistant,
}

/// A single turn in a conversation history.
///
/// Turns are immutable once appended to a history. The history itself is
/// owned by the conversation driver and superseded wholesale by the
/// canonical history a runner reports after each delegation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// The role of the turn author.
    pub role: TurnRole,
    /// The textual content of the turn.
    pub content: String,
}

impl Turn {
    /// Creates a user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
        }
    }

    /// Creates an assistant turn.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
        }
    }

    /// Check if this is a user turn
    pub fn is_user(&self) -> bool {
        self.role == TurnRole::User
    }

    /// Check if this is an assistant turn
    pub fn is_assistant(&self) -> bool {
        self.role == TurnRole::Assistant
    }
}
