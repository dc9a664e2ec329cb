//! Ollama provider implementation (local models)
//!
//! Narrative generation through the `/api/generate` endpoint of a local
//! Ollama server.

pub mod narrative;
pub mod types;

pub use narrative::OllamaNarrativeProvider;

/// Server used when neither the configuration nor `OLLAMA_HOST` names one.
pub const OLLAMA_DEFAULT_HOST: &str = "http://localhost:11434";
