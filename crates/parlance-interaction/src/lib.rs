//! Collaborator implementations for the Parlance conversation driver.
//!
//! This crate provides everything the driver treats as external:
//!
//! - [`chat_api_runner::ChatApiRunner`]: a [`parlance_core::Runner`] that
//!   talks to any OpenAI-compatible chat-completions endpoint with SSE
//!   streaming, local tool dispatch, and persona handoffs
//! - [`personas`]: the preset persona configurations
//! - [`tools`]: the callable tool abstraction and the demo weather tool
//! - [`config`]: secret-file credential loading
//! - [`prompt`]: the handoff-aware system prompt preamble

pub mod chat_api_runner;
pub mod config;
pub mod personas;
pub mod prompt;
pub mod tools;

pub use chat_api_runner::ChatApiRunner;
pub use config::{ChatApiConfig, SecretConfig, load_secret_config};
pub use personas::{assistant_persona, default_personas, english_persona};
pub use prompt::with_handoff_instructions;
pub use tools::{Tool, WeatherTool};
