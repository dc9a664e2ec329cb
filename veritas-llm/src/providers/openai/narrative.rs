//! OpenAI narrative provider implementation

use super::client::OpenAIClient;
use super::types::{CompletionRequest, CompletionResponse, Message};
use crate::providers::invalid_response;
use crate::NarrativeProvider;
use async_trait::async_trait;
use veritas_core::{LlmError, NarrativeRequest, NarrativeResponse, ProviderKind, TokenUsage};

/// Narrative provider backed by GPT models.
pub struct OpenAINarrativeProvider {
    client: OpenAIClient,
    model: String,
}

impl OpenAINarrativeProvider {
    /// Create a new OpenAI narrative provider.
    ///
    /// # Arguments
    /// * `client` - Configured HTTP client
    /// * `model` - Model name (e.g., "gpt-4o-mini", "gpt-4o")
    pub fn new(client: OpenAIClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    /// Create provider with default gpt-4o-mini model.
    pub fn with_default_model(api_key: impl Into<String>) -> Self {
        Self::new(
            OpenAIClient::new(api_key, 60, 4),
            ProviderKind::OpenAi.default_model(),
        )
    }

    pub(crate) fn build_request(&self, request: &NarrativeRequest) -> CompletionRequest {
        CompletionRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: Some(request.system.clone()),
                },
                Message {
                    role: "user".to_string(),
                    content: Some(request.prompt.clone()),
                },
            ],
            max_tokens: Some(request.max_tokens),
            temperature: Some(request.temperature),
        }
    }

    pub(crate) fn into_narrative(response: CompletionResponse) -> Result<NarrativeResponse, LlmError> {
        let usage = response.usage.map(|u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u
                .completion_tokens
                .unwrap_or_else(|| u.total_tokens.saturating_sub(u.prompt_tokens)),
        });
        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| invalid_response("openai", "No completion in response"))?;
        Ok(NarrativeResponse {
            text,
            model: response.model,
            usage,
        })
    }
}

#[async_trait]
impl NarrativeProvider for OpenAINarrativeProvider {
    async fn generate(&self, request: &NarrativeRequest) -> Result<NarrativeResponse, LlmError> {
        let body = self.build_request(request);
        let response: CompletionResponse = self.client.request("chat/completions", &body).await?;
        Self::into_narrative(response)
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

impl std::fmt::Debug for OpenAINarrativeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAINarrativeProvider")
            .field("model", &self.model)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_has_system_and_user_messages() {
        let provider = OpenAINarrativeProvider::with_default_model("key");
        let body = serde_json::to_value(provider.build_request(&NarrativeRequest {
            system: "facts only".into(),
            prompt: "CONTEXT".into(),
            max_tokens: 200,
            temperature: 0.0,
        }))
        .unwrap();
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "CONTEXT");
        assert_eq!(body["max_tokens"], 200);
    }

    #[test]
    fn test_response_with_null_content_is_invalid() {
        let response: CompletionResponse = serde_json::from_value(serde_json::json!({
            "model": "gpt-4o-mini",
            "choices": [{"message": {"role": "assistant", "content": null}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 0, "total_tokens": 10}
        }))
        .unwrap();
        assert!(matches!(
            OpenAINarrativeProvider::into_narrative(response),
            Err(LlmError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn test_response_usage_mapping() {
        let response: CompletionResponse = serde_json::from_value(serde_json::json!({
            "model": "gpt-4o-mini-2024",
            "choices": [{"message": {"role": "assistant", "content": "Revenue rose."}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 100, "total_tokens": 130}
        }))
        .unwrap();
        let narrative = OpenAINarrativeProvider::into_narrative(response).unwrap();
        assert_eq!(narrative.text, "Revenue rose.");
        assert_eq!(
            narrative.usage,
            Some(TokenUsage {
                input_tokens: 100,
                output_tokens: 30
            })
        );
    }
}
