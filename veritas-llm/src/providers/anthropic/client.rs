//! Anthropic HTTP client with rate limiting

use super::types::ApiError;
use crate::providers::{
    invalid_response, parse_retry_after_ms, rate_limited, request_failed, RequestThrottle,
};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use veritas_core::LlmError;

/// Default Messages API base URL.
pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";

/// Anthropic API client with rate limiting.
pub struct AnthropicClient {
    client: Client,
    api_key: String,
    base_url: String,
    throttle: RequestThrottle,
}

impl AnthropicClient {
    /// Create a new Anthropic client.
    ///
    /// # Arguments
    /// * `api_key` - Anthropic API key
    /// * `requests_per_minute` - Maximum requests per minute (default: 50)
    /// * `max_concurrent` - In-flight request limit
    pub fn new(api_key: impl Into<String>, requests_per_minute: u32, max_concurrent: usize) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: ANTHROPIC_BASE_URL.to_string(),
            throttle: RequestThrottle::new(max_concurrent, requests_per_minute.max(1)),
        }
    }

    /// Point the client at a different base URL (proxies, gateways).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Make an API request with automatic rate limiting.
    pub async fn request<Req: Serialize, Res: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &Req,
    ) -> Result<Res, LlmError> {
        let _permit = self.throttle.acquire("anthropic").await?;

        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| request_failed("anthropic", 0, format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let retry_after_ms = parse_retry_after_ms(response.headers()).unwrap_or(0);

        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| invalid_response("anthropic", format!("Failed to parse response: {}", e)))
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            let error_msg = match serde_json::from_str::<ApiError>(&error_text) {
                Ok(api_error) => format!("{}: {}", api_error.error.r#type, api_error.error.message),
                Err(_) => error_text,
            };

            Err(match status {
                StatusCode::TOO_MANY_REQUESTS => rate_limited("anthropic", retry_after_ms),
                _ => request_failed("anthropic", status.as_u16() as i32, error_msg),
            })
        }
    }
}

impl std::fmt::Debug for AnthropicClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_api_key() {
        let client = AnthropicClient::new("sk-ant-secret", 50, 2);
        let debug = format!("{:?}", client);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("sk-ant-secret"));
    }

    #[test]
    fn test_base_url_override_trims_slash() {
        let client = AnthropicClient::new("key", 50, 2).with_base_url("http://gateway.local/v1/");
        assert_eq!(client.base_url(), "http://gateway.local/v1");
    }
}
