//! Supersession of in-flight reports.
//!
//! When new data arrives for a source while its previous report is still
//! running, the previous run is cancelled and its bundle discarded.

use crate::{CancellationToken, ReportPipeline, SharedSource};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use veritas_core::{ReportBundle, VeritasResult};

#[derive(Debug)]
struct Running {
    generation: u64,
    token: CancellationToken,
}

/// Runs at most one report per source key.
#[derive(Debug, Clone)]
pub struct ReportSupervisor {
    pipeline: ReportPipeline,
    running: Arc<Mutex<HashMap<String, Running>>>,
    generations: Arc<AtomicU64>,
}

impl ReportSupervisor {
    pub fn new(pipeline: ReportPipeline) -> Self {
        Self {
            pipeline,
            running: Arc::new(Mutex::new(HashMap::new())),
            generations: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start a report for `key`, cancelling any run already in flight for it.
    ///
    /// # Returns
    /// A handle resolving to the bundle, or `PipelineError::Cancelled` if a
    /// later submission for the same key superseded this one.
    pub fn submit(
        &self,
        key: impl Into<String>,
        sources: Vec<SharedSource>,
    ) -> JoinHandle<VeritasResult<ReportBundle>> {
        let key = key.into();
        let token = CancellationToken::new();
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);

        {
            let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
            let previous = running.insert(
                key.clone(),
                Running {
                    generation,
                    token: token.clone(),
                },
            );
            if let Some(previous) = previous {
                tracing::info!(key = %key, "superseding in-flight report");
                previous.token.cancel();
            }
        }

        let pipeline = self.pipeline.clone();
        let running = Arc::clone(&self.running);
        tokio::spawn(async move {
            let result = pipeline.run(&sources, &token).await;
            let mut running = running.lock().unwrap_or_else(PoisonError::into_inner);
            if running
                .get(&key)
                .is_some_and(|current| current.generation == generation)
            {
                running.remove(&key);
            }
            result
        })
    }

    /// Cancel the in-flight report for `key`. Returns whether one was running.
    pub fn cancel(&self, key: &str) -> bool {
        let running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        match running.get(key) {
            Some(current) => {
                current.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Keys with a report in flight.
    pub fn in_flight(&self) -> Vec<String> {
        let running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<String> = running.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use veritas_core::{PipelineError, VeritasError};
    use veritas_llm::{MockNarrativeProvider, MockReply};
    use veritas_test_utils::fixtures::{spike_config, spike_source};

    fn supervisor(provider: &Arc<MockNarrativeProvider>) -> ReportSupervisor {
        let mut config = spike_config();
        config.llm.timeout_seconds = 60;
        ReportSupervisor::new(ReportPipeline::with_provider(config, provider.clone()).unwrap())
    }

    async fn wait_for_call(provider: &MockNarrativeProvider) {
        while provider.calls() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn sources() -> Vec<SharedSource> {
        vec![Arc::new(spike_source())]
    }

    #[tokio::test]
    async fn test_second_submission_supersedes_first() {
        let provider = Arc::new(MockNarrativeProvider::scripted(vec![
            MockReply::Delayed {
                delay: Duration::from_secs(30),
                text: "stale".into(),
            },
            MockReply::Summarize,
        ]));
        let supervisor = supervisor(&provider);

        let first = supervisor.submit("daily_sales.csv", sources());
        wait_for_call(&provider).await;
        let second = supervisor.submit("daily_sales.csv", sources());

        let first = first.await.unwrap();
        assert_eq!(
            first.unwrap_err(),
            VeritasError::Pipeline(PipelineError::Cancelled)
        );
        let second = second.await.unwrap().unwrap();
        assert!(second.insight.record().is_some());
        assert!(supervisor.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_distinct_keys_run_independently() {
        let supervisor = supervisor(&Arc::new(MockNarrativeProvider::summarizing()));
        let a = supervisor.submit("a.csv", sources());
        let b = supervisor.submit("b.csv", sources());
        assert!(a.await.unwrap().is_ok());
        assert!(b.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_cancel_unknown_key() {
        let supervisor = supervisor(&Arc::new(MockNarrativeProvider::summarizing()));
        assert!(!supervisor.cancel("missing.csv"));
    }

    #[tokio::test]
    async fn test_explicit_cancel() {
        let provider = Arc::new(MockNarrativeProvider::scripted(vec![MockReply::Delayed {
            delay: Duration::from_secs(30),
            text: "late".into(),
        }]));
        let supervisor = supervisor(&provider);
        let handle = supervisor.submit("slow.csv", sources());
        wait_for_call(&provider).await;
        assert!(supervisor.cancel("slow.csv"));
        assert_eq!(
            handle.await.unwrap().unwrap_err(),
            VeritasError::Pipeline(PipelineError::Cancelled)
        );
    }
}
