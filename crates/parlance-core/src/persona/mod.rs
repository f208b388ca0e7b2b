//! Persona domain module.
//!
//! This module contains the persona domain model and the opaque handle
//! the conversation driver carries between turns.
//!
//! # Module Structure
//!
//! - `model`: Core persona domain models (`Persona`, `PersonaId`)

mod model;

// Re-export public API
pub use model::{Persona, PersonaId};
