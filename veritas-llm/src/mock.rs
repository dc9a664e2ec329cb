//! Scripted narrative provider for tests and dry runs.

use crate::NarrativeProvider;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use veritas_context::context_summary;
use veritas_core::{
    InsightContext, LlmError, NarrativeRequest, NarrativeResponse, ProviderKind, TokenUsage,
};

/// Marker preceding the context JSON in a rendered prompt.
const CONTEXT_MARKER: &str = "CONTEXT:\n";

/// One scripted reply.
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    /// Return this text
    Text(String),
    /// Fail with this error
    Fail(LlmError),
    /// Sleep, then return the text
    Delayed { delay: Duration, text: String },
    /// Summarize the context embedded in the prompt
    Summarize,
}

/// Deterministic provider that replays scripted replies in order and then
/// repeats the last one.
#[derive(Debug)]
pub struct MockNarrativeProvider {
    replies: Mutex<VecDeque<MockReply>>,
    last: Mutex<MockReply>,
    requests: Mutex<Vec<NarrativeRequest>>,
    calls: AtomicUsize,
    model: String,
}

impl MockNarrativeProvider {
    /// Always answer with `text`.
    pub fn with_text(text: impl Into<String>) -> Self {
        Self::scripted(vec![MockReply::Text(text.into())])
    }

    /// Answer with a summary of the prompt's context, grounded by construction.
    pub fn summarizing() -> Self {
        Self::scripted(vec![MockReply::Summarize])
    }

    /// Replay `replies` in order.
    pub fn scripted(replies: Vec<MockReply>) -> Self {
        let last = replies
            .last()
            .cloned()
            .unwrap_or(MockReply::Fail(LlmError::ProviderNotConfigured));
        Self {
            replies: Mutex::new(replies.into()),
            last: Mutex::new(last),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            model: ProviderKind::Mock.default_model().to_string(),
        }
    }

    /// Number of `generate` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests received, oldest first.
    pub fn requests(&self) -> Vec<NarrativeRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn next_reply(&self) -> MockReply {
        let mut replies = self.replies.lock().unwrap_or_else(PoisonError::into_inner);
        match replies.pop_front() {
            Some(reply) => {
                *self.last.lock().unwrap_or_else(PoisonError::into_inner) = reply.clone();
                reply
            }
            None => self
                .last
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }

    fn respond(&self, request: &NarrativeRequest, text: String) -> NarrativeResponse {
        NarrativeResponse {
            usage: Some(TokenUsage {
                input_tokens: word_count(&request.system) + word_count(&request.prompt),
                output_tokens: word_count(&text),
            }),
            text,
            model: self.model.clone(),
        }
    }
}

fn word_count(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

/// Recover the context from a rendered prompt.
pub fn context_from_prompt(prompt: &str) -> Result<InsightContext, LlmError> {
    let start = prompt
        .find(CONTEXT_MARKER)
        .map(|i| i + CONTEXT_MARKER.len())
        .ok_or_else(|| LlmError::InvalidResponse {
            provider: "mock".to_string(),
            reason: "prompt carries no context".to_string(),
        })?;
    serde_json::from_str(prompt[start..].trim()).map_err(|e| LlmError::InvalidResponse {
        provider: "mock".to_string(),
        reason: format!("context is not valid JSON: {e}"),
    })
}

#[async_trait]
impl NarrativeProvider for MockNarrativeProvider {
    async fn generate(&self, request: &NarrativeRequest) -> Result<NarrativeResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        match self.next_reply() {
            MockReply::Text(text) => Ok(self.respond(request, text)),
            MockReply::Fail(error) => Err(error),
            MockReply::Delayed { delay, text } => {
                tokio::time::sleep(delay).await;
                Ok(self.respond(request, text))
            }
            MockReply::Summarize => {
                let context = context_from_prompt(&request.prompt)?;
                Ok(self.respond(request, context_summary(&context)))
            }
        }
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Mock
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
