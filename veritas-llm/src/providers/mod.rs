//! Narrative provider implementations
//!
//! Concrete [`NarrativeProvider`](crate::NarrativeProvider) implementations
//! for hosted and local language-model services.

pub mod anthropic;
pub mod ollama;
pub mod openai;

pub use anthropic::{AnthropicClient, AnthropicNarrativeProvider};
pub use ollama::OllamaNarrativeProvider;
pub use openai::{OpenAIClient, OpenAINarrativeProvider};

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, SemaphorePermit};
use veritas_core::LlmError;

// ============================================================================
// ERROR HELPERS
// ============================================================================

pub(crate) fn request_failed(provider: &str, status: i32, message: impl Into<String>) -> LlmError {
    LlmError::RequestFailed {
        provider: provider.to_string(),
        status,
        message: message.into(),
    }
}

pub(crate) fn rate_limited(provider: &str, retry_after_ms: i64) -> LlmError {
    LlmError::RateLimited {
        provider: provider.to_string(),
        retry_after_ms,
    }
}

pub(crate) fn invalid_response(provider: &str, reason: impl Into<String>) -> LlmError {
    LlmError::InvalidResponse {
        provider: provider.to_string(),
        reason: reason.into(),
    }
}

/// Parse a `retry-after` header given in (possibly fractional) seconds.
pub(crate) fn parse_retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<i64> {
    headers
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
        .map(|seconds| (seconds * 1000.0) as i64)
}

// ============================================================================
// REQUEST THROTTLE
// ============================================================================

/// Bounds concurrent requests and spaces them by a minimum interval.
pub(crate) struct RequestThrottle {
    permits: Semaphore,
    last_request: AtomicU64,
    min_request_interval_ms: u64,
    start_time: Instant,
}

impl RequestThrottle {
    /// # Arguments
    /// * `max_concurrent` - In-flight request limit
    /// * `requests_per_minute` - Spacing target; `0` disables spacing
    pub(crate) fn new(max_concurrent: usize, requests_per_minute: u32) -> Self {
        let min_request_interval_ms = match requests_per_minute {
            0 => 0,
            rpm => (60_000 / rpm as u64).max(10),
        };
        Self {
            permits: Semaphore::new(max_concurrent.max(1)),
            last_request: AtomicU64::new(0),
            min_request_interval_ms,
            start_time: Instant::now(),
        }
    }

    /// Wait for a permit and for the minimum interval to pass.
    pub(crate) async fn acquire(&self, provider: &str) -> Result<SemaphorePermit<'_>, LlmError> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| request_failed(provider, 0, format!("Rate limiter error: {}", e)))?;

        if self.min_request_interval_ms > 0 {
            let now_ms = self.start_time.elapsed().as_millis() as u64;
            let last_ms = self.last_request.load(Ordering::Relaxed);
            let elapsed = now_ms.saturating_sub(last_ms);
            if last_ms > 0 && elapsed < self.min_request_interval_ms {
                let wait_ms = self.min_request_interval_ms - elapsed;
                tokio::time::sleep(Duration::from_millis(wait_ms)).await;
            }
            self.last_request
                .store(self.start_time.elapsed().as_millis().max(1) as u64, Ordering::Relaxed);
        }
        Ok(permit)
    }

    pub(crate) fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}
