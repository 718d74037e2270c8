//! Terminal chat panel that relays prompts to a local Ollama server and
//! streams the answers back, hiding the model's reasoning section.

pub mod config;
pub mod events;
pub mod llm;
pub mod prompts;
pub mod relay;
pub mod session;
pub mod store;
pub mod streaming;
pub mod ui;
