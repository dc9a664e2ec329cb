//! Insight generator: one narrative request per report, with per-attempt
//! timeouts and bounded retries.

use crate::{NarrativeProvider, UsageTracker};
use std::sync::Arc;
use std::time::Duration;
use veritas_context::narrative_request;
use veritas_core::{InsightContext, InsightRecord, LlmConfig, LlmError, NarrativeRequest};

/// Turns an [`InsightContext`] into a draft [`InsightRecord`].
pub struct InsightGenerator {
    provider: Arc<dyn NarrativeProvider>,
    config: LlmConfig,
    usage: Arc<UsageTracker>,
}

impl InsightGenerator {
    pub fn new(provider: Arc<dyn NarrativeProvider>, config: LlmConfig) -> Self {
        Self {
            provider,
            config,
            usage: Arc::new(UsageTracker::new()),
        }
    }

    /// Share a usage tracker across generators.
    pub fn with_usage_tracker(mut self, usage: Arc<UsageTracker>) -> Self {
        self.usage = usage;
        self
    }

    pub fn usage(&self) -> &Arc<UsageTracker> {
        &self.usage
    }

    pub fn provider(&self) -> &Arc<dyn NarrativeProvider> {
        &self.provider
    }

    /// Total attempts made before giving up.
    pub fn max_attempts(&self) -> u32 {
        self.config.retry.max_retries.max(1)
    }

    /// Generate a draft narrative for the context.
    ///
    /// # Errors
    /// `GenerationUnavailable` once every attempt has timed out or failed.
    pub async fn generate(&self, context: &InsightContext) -> Result<InsightRecord, LlmError> {
        let request = narrative_request(context, &self.config).map_err(|e| {
            LlmError::InvalidResponse {
                provider: self.provider.kind().to_string(),
                reason: format!("context serialization failed: {e}"),
            }
        })?;

        let attempts = self.max_attempts();
        let mut last_error = String::new();
        for attempt in 0..attempts {
            match self.attempt(&request).await {
                Ok((text, model, usage)) => {
                    self.usage.record(usage.as_ref());
                    tracing::info!(
                        provider = %self.provider.kind(),
                        model = %model,
                        attempt = attempt + 1,
                        "narrative generated"
                    );
                    return Ok(InsightRecord::draft(
                        context.report_id,
                        self.provider.kind().as_str(),
                        model,
                        text,
                        usage,
                    ));
                }
                Err(error) => {
                    self.usage.record_failure();
                    tracing::warn!(
                        provider = %self.provider.kind(),
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        error = %error,
                        "narrative attempt failed"
                    );
                    if attempt + 1 < attempts {
                        tokio::time::sleep(self.backoff(attempt, &error)).await;
                    }
                    last_error = error.to_string();
                }
            }
        }

        Err(LlmError::GenerationUnavailable {
            attempts,
            last_error,
        })
    }

    async fn attempt(
        &self,
        request: &NarrativeRequest,
    ) -> Result<(String, String, Option<veritas_core::TokenUsage>), LlmError> {
        let timeout = self.config.timeout();
        let response = tokio::time::timeout(timeout, self.provider.generate(request))
            .await
            .map_err(|_| LlmError::Timeout {
                provider: self.provider.kind().to_string(),
                after_ms: timeout.as_millis() as u64,
            })??;

        let text = strip_code_fences(&response.text);
        if text.is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: self.provider.kind().to_string(),
                reason: "empty narrative".to_string(),
            });
        }
        let model = if response.model.is_empty() {
            self.provider.model_id().to_string()
        } else {
            response.model
        };
        Ok((text, model, response.usage))
    }

    /// Exponential backoff, stretched to honour a provider's retry-after hint.
    fn backoff(&self, attempt: u32, error: &LlmError) -> Duration {
        let base = self.config.retry.backoff_for(attempt);
        match error {
            LlmError::RateLimited { retry_after_ms, .. } if *retry_after_ms > 0 => {
                base.max(Duration::from_millis(*retry_after_ms as u64))
            }
            _ => base,
        }
    }
}

impl std::fmt::Debug for InsightGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InsightGenerator")
            .field("provider", &self.provider.kind())
            .field("model", &self.provider.model_id())
            .field("max_attempts", &self.max_attempts())
            .finish()
    }
}

/// Remove surrounding Markdown code fences and whitespace.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    // Drop the info string ("```text") on the opening line.
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockNarrativeProvider, MockReply};
    use chrono::Utc;
    use std::collections::BTreeMap;
    use uuid::Uuid;
    use veritas_core::{ContextDataset, NarrativeResponse, ProviderKind, RetryConfig, SectionStatus};

    /// Provider whose responses carry no token counts.
    struct Unmetered;

    #[async_trait::async_trait]
    impl NarrativeProvider for Unmetered {
        async fn generate(&self, _: &NarrativeRequest) -> Result<NarrativeResponse, LlmError> {
            Ok(NarrativeResponse {
                text: "Revenue rose.".into(),
                model: "unmetered".into(),
                usage: None,
            })
        }

        fn kind(&self) -> ProviderKind {
            ProviderKind::Mock
        }

        fn model_id(&self) -> &str {
            "unmetered"
        }
    }

    fn context() -> InsightContext {
        InsightContext {
            report_id: Uuid::nil(),
            dataset: ContextDataset {
                row_count: 0,
                complete_rows: 0,
                start: Some(Utc::now()),
                end: None,
                metrics: Vec::new(),
                dimensions: Vec::new(),
                dimension_values: BTreeMap::new(),
            },
            current_period: None,
            prior_period: None,
            kpis: Vec::new(),
            correlations: Vec::new(),
            anomaly_status: SectionStatus::Complete,
            anomaly_threshold: None,
            anomalies: Vec::new(),
        }
    }

    fn config(max_retries: u32) -> LlmConfig {
        LlmConfig {
            timeout_seconds: 1,
            retry: RetryConfig {
                max_retries,
                initial_backoff_ms: 10,
                max_backoff_ms: 50,
                backoff_multiplier: 2.0,
            },
            ..LlmConfig::default()
        }
    }

    fn failure() -> MockReply {
        MockReply::Fail(LlmError::RequestFailed {
            provider: "mock".into(),
            status: 503,
            message: "overloaded".into(),
        })
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("  plain text \n"), "plain text");
        assert_eq!(strip_code_fences("```\nRevenue rose.\n```"), "Revenue rose.");
        assert_eq!(strip_code_fences("```text\nRevenue rose.\n```\n"), "Revenue rose.");
        assert_eq!(strip_code_fences("```\n```"), "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_success_records_usage() {
        let provider = Arc::new(MockNarrativeProvider::with_text("```\nRevenue rose 10%.\n```"));
        let generator = InsightGenerator::new(provider.clone(), config(3));
        let record = generator.generate(&context()).await.unwrap();
        assert_eq!(record.draft, "Revenue rose 10%.");
        assert_eq!(record.provider, "mock");
        assert_eq!(record.model, "mock-narrator");
        assert!(!record.finalized);
        assert_eq!(provider.calls(), 1);
        assert_eq!(generator.usage().requests(), 1);
        assert!(generator.usage().output_tokens() > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_without_usage_is_counted() {
        let generator = InsightGenerator::new(Arc::new(Unmetered), config(3));
        let record = generator.generate(&context()).await.unwrap();
        assert_eq!(record.draft, "Revenue rose.");
        assert_eq!(generator.usage().requests(), 1);
        assert_eq!(generator.usage().snapshot().total(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let provider = Arc::new(MockNarrativeProvider::scripted(vec![
            failure(),
            MockReply::Text("   ".into()),
            MockReply::Text("Recovered.".into()),
        ]));
        let generator = InsightGenerator::new(provider.clone(), config(3));
        let record = generator.generate(&context()).await.unwrap();
        assert_eq!(record.draft, "Recovered.");
        assert_eq!(provider.calls(), 3);
        assert_eq!(generator.usage().failures(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_surface_generation_unavailable() {
        let provider = Arc::new(MockNarrativeProvider::scripted(vec![failure()]));
        let generator = InsightGenerator::new(provider.clone(), config(3));
        let err = generator.generate(&context()).await.unwrap_err();
        match err {
            LlmError::GenerationUnavailable {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("overloaded"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failed_attempt() {
        let provider = Arc::new(MockNarrativeProvider::scripted(vec![MockReply::Delayed {
            delay: Duration::from_secs(60),
            text: "too late".into(),
        }]));
        let generator = InsightGenerator::new(provider.clone(), config(2));
        let err = generator.generate(&context()).await.unwrap_err();
        match err {
            LlmError::GenerationUnavailable { last_error, .. } => {
                assert!(last_error.contains("timed out"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_still_attempts_once() {
        let provider = Arc::new(MockNarrativeProvider::with_text("ok"));
        let generator = InsightGenerator::new(provider.clone(), config(0));
        assert_eq!(generator.max_attempts(), 1);
        assert!(generator.generate(&context()).await.is_ok());
    }

    #[test]
    fn test_backoff_honours_retry_after() {
        let provider = Arc::new(MockNarrativeProvider::with_text("ok"));
        let generator = InsightGenerator::new(provider, config(3));
        let limited = LlmError::RateLimited {
            provider: "openai".into(),
            retry_after_ms: 2_000,
        };
        assert_eq!(generator.backoff(0, &limited), Duration::from_millis(2_000));
        assert_eq!(generator.backoff(1, &failure_error()), Duration::from_millis(20));
    }

    fn failure_error() -> LlmError {
        LlmError::InvalidResponse {
            provider: "mock".into(),
            reason: "empty narrative".into(),
        }
    }
}
