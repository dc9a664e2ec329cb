//! Ollama API request and response types

use serde::{Deserialize, Serialize};

// ============================================================================
// GENERATE TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub stream: bool,
    pub options: GenerateOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateOptions {
    pub temperature: f32,
    pub num_predict: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateResponse {
    pub model: String,
    pub response: String,
    #[serde(default)]
    pub done: bool,
    /// Prompt tokens
    pub prompt_eval_count: Option<u64>,
    /// Generated tokens
    pub eval_count: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    pub error: String,
}
