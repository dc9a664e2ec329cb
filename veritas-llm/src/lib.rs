//! Veritas LLM - Narrative generation
//!
//! Provider-agnostic capability trait for narrative generation, the HTTP
//! providers that implement it, a scripted mock, and the
//! [`InsightGenerator`] that drives one request per report.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use veritas_core::{
    ConfigError, LlmConfig, LlmError, NarrativeRequest, NarrativeResponse, ProviderKind,
    TokenUsage, VeritasResult,
};

pub mod generator;
pub mod mock;
pub mod providers;

pub use generator::{strip_code_fences, InsightGenerator};
pub use mock::{context_from_prompt, MockNarrativeProvider, MockReply};
pub use providers::{
    AnthropicClient, AnthropicNarrativeProvider, OllamaNarrativeProvider, OpenAIClient,
    OpenAINarrativeProvider,
};

// ============================================================================
// NARRATIVE PROVIDER TRAIT
// ============================================================================

/// A service that turns a narrative request into text.
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait NarrativeProvider: Send + Sync {
    /// Issue one request.
    ///
    /// # Arguments
    /// * `request` - System instruction and rendered context
    ///
    /// # Returns
    /// * `Ok(NarrativeResponse)` - Raw text and usage
    /// * `Err(LlmError)` - Transport, status or payload failure
    async fn generate(&self, request: &NarrativeRequest) -> Result<NarrativeResponse, LlmError>;

    /// Provider family, for provenance on insight records.
    fn kind(&self) -> ProviderKind;

    /// Model identifier requests are sent to.
    fn model_id(&self) -> &str;
}

// ============================================================================
// USAGE TRACKER
// ============================================================================

/// Accumulates token usage across requests.
/// Thread-safe via atomic operations.
pub struct UsageTracker {
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    requests: AtomicU64,
    failures: AtomicU64,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self {
            input_tokens: AtomicU64::new(0),
            output_tokens: AtomicU64::new(0),
            requests: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Record a successful request, with its token counts when the provider
    /// reported them.
    pub fn record(&self, usage: Option<&TokenUsage>) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if let Some(usage) = usage {
            self.input_tokens
                .fetch_add(usage.input_tokens, Ordering::Relaxed);
            self.output_tokens
                .fetch_add(usage.output_tokens, Ordering::Relaxed);
        }
    }

    /// Record a failed attempt.
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn input_tokens(&self) -> u64 {
        self.input_tokens.load(Ordering::Relaxed)
    }

    pub fn output_tokens(&self) -> u64 {
        self.output_tokens.load(Ordering::Relaxed)
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Totals so far.
    pub fn snapshot(&self) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input_tokens(),
            output_tokens: self.output_tokens(),
        }
    }

    pub fn reset(&self) {
        self.input_tokens.store(0, Ordering::Relaxed);
        self.output_tokens.store(0, Ordering::Relaxed);
        self.requests.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
    }
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for UsageTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageTracker")
            .field("input_tokens", &self.input_tokens())
            .field("output_tokens", &self.output_tokens())
            .field("requests", &self.requests())
            .field("failures", &self.failures())
            .finish()
    }
}

// ============================================================================
// PROVIDER CONSTRUCTION
// ============================================================================

/// Build the configured provider, reading API keys from the process
/// environment.
pub fn build_provider(config: &LlmConfig) -> VeritasResult<Arc<dyn NarrativeProvider>> {
    build_provider_with(config, |key| std::env::var(key).ok())
}

/// Build the configured provider with an explicit environment lookup.
///
/// # Errors
/// * `LlmError::ProviderNotConfigured` when no provider is configured
/// * `ConfigError::MissingRequired` when the provider's API key is absent
pub fn build_provider_with(
    config: &LlmConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> VeritasResult<Arc<dyn NarrativeProvider>> {
    let provider = config
        .provider
        .as_ref()
        .ok_or(LlmError::ProviderNotConfigured)?;
    let api_key = |name: &str| {
        lookup(name)
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingRequired {
                field: name.to_string(),
            })
    };
    let concurrency = config.max_concurrent_requests;

    let built: Arc<dyn NarrativeProvider> = match provider.provider_type {
        ProviderKind::Anthropic => {
            let mut client = AnthropicClient::new(api_key("ANTHROPIC_API_KEY")?, 50, concurrency);
            if let Some(endpoint) = &provider.endpoint {
                client = client.with_base_url(endpoint.as_str());
            }
            Arc::new(AnthropicNarrativeProvider::new(client, provider.model.as_str()))
        }
        ProviderKind::OpenAi => {
            let mut client = OpenAIClient::new(api_key("OPENAI_API_KEY")?, 60, concurrency);
            if let Some(endpoint) = &provider.endpoint {
                client = client.with_base_url(endpoint.as_str());
            }
            Arc::new(OpenAINarrativeProvider::new(client, provider.model.as_str()))
        }
        ProviderKind::Ollama => {
            let host = provider
                .endpoint
                .clone()
                .or_else(|| lookup("OLLAMA_HOST"))
                .unwrap_or_else(|| providers::ollama::OLLAMA_DEFAULT_HOST.to_string());
            Arc::new(OllamaNarrativeProvider::new(
                host,
                provider.model.as_str(),
                concurrency,
            ))
        }
        ProviderKind::Mock => Arc::new(MockNarrativeProvider::summarizing()),
    };
    tracing::debug!(
        provider = %built.kind(),
        model = built.model_id(),
        "narrative provider ready"
    );
    Ok(built)
}

// ============================================================================
// UNIT TESTS
// ============================================================================
