pub mod conversation;
pub mod driver;
pub mod error;
pub mod persona;
pub mod runner;

// Re-export common error type
pub use error::{ParlanceError, Result};

pub use conversation::{Turn, TurnRole};
pub use driver::{ConversationDriver, StartCallback, TurnStream};
pub use persona::{Persona, PersonaId};
pub use runner::{RunOutcome, RunProducer, Runner, StreamedRun};
