//! Anthropic (Claude) provider implementation
//!
//! Narrative generation through the Messages API.

pub mod client;
pub mod narrative;
pub mod types;

pub use client::AnthropicClient;
pub use narrative::AnthropicNarrativeProvider;
