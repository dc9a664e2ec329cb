//! Anthropic (Claude) narrative provider implementation

use super::client::AnthropicClient;
use super::types::{ContentBlock, Message, MessageRequest, MessageResponse};
use crate::NarrativeProvider;
use async_trait::async_trait;
use veritas_core::{LlmError, NarrativeRequest, NarrativeResponse, ProviderKind, TokenUsage};

/// Narrative provider backed by Claude models.
pub struct AnthropicNarrativeProvider {
    client: AnthropicClient,
    model: String,
}

impl AnthropicNarrativeProvider {
    /// Create a new Anthropic narrative provider.
    ///
    /// # Arguments
    /// * `client` - Configured HTTP client
    /// * `model` - Model name (e.g., "claude-3-5-haiku-latest")
    pub fn new(client: AnthropicClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    /// Create provider with the default model.
    pub fn with_default_model(api_key: impl Into<String>) -> Self {
        Self::new(
            AnthropicClient::new(api_key, 50, 4),
            ProviderKind::Anthropic.default_model(),
        )
    }

    pub(crate) fn build_request(&self, request: &NarrativeRequest) -> MessageRequest {
        MessageRequest {
            model: self.model.clone(),
            system: Some(request.system.clone()),
            messages: vec![Message {
                role: "user".to_string(),
                content: request.prompt.clone(),
            }],
            max_tokens: request.max_tokens,
            temperature: Some(request.temperature),
        }
    }

    /// Join the text blocks of a response.
    pub(crate) fn extract_text(content: Vec<ContentBlock>) -> String {
        content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl NarrativeProvider for AnthropicNarrativeProvider {
    async fn generate(&self, request: &NarrativeRequest) -> Result<NarrativeResponse, LlmError> {
        let body = self.build_request(request);
        let response: MessageResponse = self.client.request("messages", &body).await?;
        if let Some(reason) = response.stop_reason.as_deref() {
            tracing::debug!(provider = "anthropic", stop_reason = reason, "narrative completed");
        }
        Ok(NarrativeResponse {
            text: Self::extract_text(response.content),
            model: response.model,
            usage: response.usage.map(|u| TokenUsage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
            }),
        })
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

impl std::fmt::Debug for AnthropicNarrativeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicNarrativeProvider")
            .field("model", &self.model)
            .finish()
    }
}
