//! Conversation domain module.
//!
//! This module contains the turn types that make up a conversation
//! history.
//!
//! # Module Structure
//!
//! - `turn`: Turn types (`Turn`, `TurnRole`)

mod turn;

// Re-export public API
pub use turn::{Turn, TurnRole};
