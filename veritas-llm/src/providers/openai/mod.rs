//! OpenAI provider implementation
//!
//! Narrative generation through the Chat Completions API.

pub mod client;
pub mod narrative;
pub mod types;

pub use client::OpenAIClient;
pub use narrative::OpenAINarrativeProvider;
