//! Ollama narrative provider implementation (local models)

use super::types::{ApiError, GenerateOptions, GenerateRequest, GenerateResponse};
use crate::providers::{invalid_response, request_failed, RequestThrottle};
use crate::NarrativeProvider;
use async_trait::async_trait;
use reqwest::Client;
use veritas_core::{LlmError, NarrativeRequest, NarrativeResponse, ProviderKind, TokenUsage};

/// Ollama narrative provider for local models.
pub struct OllamaNarrativeProvider {
    client: Client,
    base_url: String,
    model: String,
    throttle: RequestThrottle,
}

impl OllamaNarrativeProvider {
    /// Create a new Ollama narrative provider.
    ///
    /// # Arguments
    /// * `base_url` - Ollama server URL (e.g., "http://localhost:11434")
    /// * `model` - Model name (e.g., "llama3.1", "mistral")
    /// * `max_concurrent` - In-flight request limit
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, max_concurrent: usize) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            throttle: RequestThrottle::new(max_concurrent, 0),
        }
    }

    /// Create provider with the default model.
    pub fn with_default_model(base_url: impl Into<String>) -> Self {
        Self::new(base_url, ProviderKind::Ollama.default_model(), 4)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn build_request(&self, request: &NarrativeRequest) -> GenerateRequest {
        GenerateRequest {
            model: self.model.clone(),
            prompt: request.prompt.clone(),
            system: Some(request.system.clone()),
            stream: false,
            options: GenerateOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        }
    }

    pub(crate) fn into_narrative(response: GenerateResponse) -> Result<NarrativeResponse, LlmError> {
        if !response.done {
            return Err(invalid_response("ollama", "Generation did not complete"));
        }
        let usage = match (response.prompt_eval_count, response.eval_count) {
            (None, None) => None,
            (input, output) => Some(TokenUsage {
                input_tokens: input.unwrap_or(0),
                output_tokens: output.unwrap_or(0),
            }),
        };
        Ok(NarrativeResponse {
            text: response.response,
            model: response.model,
            usage,
        })
    }
}

#[async_trait]
impl NarrativeProvider for OllamaNarrativeProvider {
    async fn generate(&self, request: &NarrativeRequest) -> Result<NarrativeResponse, LlmError> {
        let _permit = self.throttle.acquire("ollama").await?;
        let body = self.build_request(request);

        let url = format!("{}/api/generate", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| request_failed("ollama", 0, format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let message = serde_json::from_str::<ApiError>(&error_text)
                .map(|e| e.error)
                .unwrap_or(error_text);
            return Err(request_failed("ollama", status.as_u16() as i32, message));
        }

        let generated: GenerateResponse = response
            .json()
            .await
            .map_err(|e| invalid_response("ollama", format!("Failed to parse response: {}", e)))?;
        Self::into_narrative(generated)
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

impl std::fmt::Debug for OllamaNarrativeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaNarrativeProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_disables_streaming() {
        let provider = OllamaNarrativeProvider::with_default_model("http://localhost:11434/");
        assert_eq!(provider.base_url(), "http://localhost:11434");
        let body = serde_json::to_value(provider.build_request(&NarrativeRequest {
            system: "facts only".into(),
            prompt: "CONTEXT".into(),
            max_tokens: 300,
            temperature: 0.1,
        }))
        .unwrap();
        assert_eq!(body["stream"], false);
        assert_eq!(body["model"], "llama3.1");
        assert_eq!(body["options"]["num_predict"], 300);
        assert_eq!(body["system"], "facts only");
    }

    #[test]
    fn test_incomplete_generation_is_invalid() {
        let response: GenerateResponse = serde_json::from_value(serde_json::json!({
            "model": "llama3.1",
            "response": "Revenue",
            "done": false
        }))
        .unwrap();
        assert!(OllamaNarrativeProvider::into_narrative(response).is_err());
    }

    #[test]
    fn test_usage_from_eval_counts() {
        let response: GenerateResponse = serde_json::from_value(serde_json::json!({
            "model": "llama3.1",
            "response": "Revenue rose.",
            "done": true,
            "prompt_eval_count": 50,
            "eval_count": 7
        }))
        .unwrap();
        let narrative = OllamaNarrativeProvider::into_narrative(response).unwrap();
        assert_eq!(narrative.usage.map(|u| u.total()), Some(57));
    }
}
