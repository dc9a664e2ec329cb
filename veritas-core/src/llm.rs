//! LLM-related primitive types.
//!
//! Pure data types for narrative generation. Traits and orchestration live in
//! veritas-llm.

use serde::{Deserialize, Serialize};

// ============================================================================
// PROVIDER KIND
// ============================================================================

/// Supported narrative providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Anthropic,
    OpenAi,
    Ollama,
    /// Deterministic scripted provider for tests and dry runs
    Mock,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
            Self::Mock => "mock",
        }
    }

    /// Parse a provider name, case-insensitively.
    pub fn from_name(s: &str) -> Result<Self, ProviderKindParseError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            "mock" => Ok(Self::Mock),
            _ => Err(ProviderKindParseError(s.to_string())),
        }
    }

    /// Model used when the configuration names none.
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Anthropic => "claude-3-5-haiku-latest",
            Self::OpenAi => "gpt-4o-mini",
            Self::Ollama => "llama3.1",
            Self::Mock => "mock-narrator",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing ProviderKind from string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderKindParseError(pub String);

impl std::fmt::Display for ProviderKindParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid provider kind: {}", self.0)
    }
}

impl std::error::Error for ProviderKindParseError {}

// ============================================================================
// REQUEST / RESPONSE
// ============================================================================

/// A single narrative request: fixed system instruction plus rendered context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeRequest {
    pub system: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Token counts reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Raw text returned by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeResponse {
    pub text: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_roundtrip_names() {
        for kind in [
            ProviderKind::Anthropic,
            ProviderKind::OpenAi,
            ProviderKind::Ollama,
            ProviderKind::Mock,
        ] {
            assert_eq!(ProviderKind::from_name(kind.as_str()), Ok(kind));
        }
    }

    #[test]
    fn test_provider_kind_is_case_insensitive() {
        assert_eq!(ProviderKind::from_name(" OpenAI "), Ok(ProviderKind::OpenAi));
    }

    #[test]
    fn test_provider_kind_rejects_unknown() {
        let err = ProviderKind::from_name("gemini").unwrap_err();
        assert_eq!(err.to_string(), "invalid provider kind: gemini");
    }

    #[test]
    fn test_token_usage_total() {
        let usage = TokenUsage {
            input_tokens: 120,
            output_tokens: 30,
        };
        assert_eq!(usage.total(), 150);
    }
}
