//! Veritas Pipeline - Report orchestration
//!
//! Runs one report end to end:
//!
//! ```text
//! sources ─▶ Normalizer ─┬─▶ KpiCalculator ───┬─▶ ContextBuilder ─▶ InsightGenerator ─▶ ConsistencyGuard ─▶ ReportBundle
//!                        └─▶ AnomalyDetector ─┘
//! ```
//!
//! Ingestion failures abort the report. Every later failure degrades its
//! section instead: a report is produced whenever a valid dataset exists.

pub mod cancel;
pub mod render;
pub mod supervisor;
pub mod telemetry;

pub use cancel::CancellationToken;
pub use render::render_text;
pub use supervisor::ReportSupervisor;
pub use telemetry::{init_tracing, TelemetryConfig};

use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::Instrument;
use veritas_anomaly::AnomalyDetector;
use veritas_context::{context_summary, ContextBuilder};
use veritas_core::{
    AnomalyError, AnomalyReport, Dataset, DegradedSection, InsightSection, KpiReport, LlmError,
    PipelineError, ReportBundle, SectionStatus, Stage, VeritasConfig, VeritasError,
    VeritasResult,
};
use veritas_guard::ConsistencyGuard;
use veritas_ingest::{Normalizer, TableSource};
use veritas_kpi::KpiCalculator;
use veritas_llm::{build_provider, InsightGenerator, NarrativeProvider, UsageTracker};

/// Shared handle to a table source.
pub type SharedSource = Arc<dyn TableSource>;

/// One report to run: a key identifying the input and its sources.
#[derive(Clone)]
pub struct ReportJob {
    /// Source identity, e.g. the dropped file's path
    pub key: String,
    pub sources: Vec<SharedSource>,
}

impl ReportJob {
    pub fn new(key: impl Into<String>, sources: Vec<SharedSource>) -> Self {
        Self {
            key: key.into(),
            sources,
        }
    }
}

impl std::fmt::Debug for ReportJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.sources.iter().map(|s| s.name()).collect();
        f.debug_struct("ReportJob")
            .field("key", &self.key)
            .field("sources", &names)
            .finish()
    }
}

// ============================================================================
// REPORT PIPELINE
// ============================================================================

/// Runs reports. Cheap to clone; clones share configuration, provider and
/// usage counters.
#[derive(Clone)]
pub struct ReportPipeline {
    config: Arc<VeritasConfig>,
    provider: Option<Arc<dyn NarrativeProvider>>,
    usage: Arc<UsageTracker>,
}

impl ReportPipeline {
    /// Validate the configuration and build the configured provider.
    ///
    /// A missing provider is not an error: reports fall back to the
    /// context-only summary.
    pub fn new(config: VeritasConfig) -> VeritasResult<Self> {
        config.validate()?;
        let provider = match build_provider(&config.llm) {
            Ok(provider) => Some(provider),
            Err(VeritasError::Llm(LlmError::ProviderNotConfigured)) => {
                tracing::warn!("no LLM provider configured; reports will be context-only");
                None
            }
            Err(e) => return Err(e),
        };
        Ok(Self::assemble(config, provider))
    }

    /// Use an explicit provider, e.g. a scripted mock.
    pub fn with_provider(
        config: VeritasConfig,
        provider: Arc<dyn NarrativeProvider>,
    ) -> VeritasResult<Self> {
        config.validate()?;
        Ok(Self::assemble(config, Some(provider)))
    }

    /// Run without a narrative provider.
    pub fn context_only(config: VeritasConfig) -> VeritasResult<Self> {
        config.validate()?;
        Ok(Self::assemble(config, None))
    }

    fn assemble(config: VeritasConfig, provider: Option<Arc<dyn NarrativeProvider>>) -> Self {
        Self {
            config: Arc::new(config),
            provider,
            usage: Arc::new(UsageTracker::new()),
        }
    }

    pub fn config(&self) -> &VeritasConfig {
        &self.config
    }

    /// Token usage across every report run by this pipeline and its clones.
    pub fn usage(&self) -> &Arc<UsageTracker> {
        &self.usage
    }

    /// Run one report.
    ///
    /// # Errors
    /// * `VeritasError::Ingest` - the sources did not yield a valid dataset
    /// * `PipelineError::Cancelled` - the token fired before the bundle was complete
    /// * `PipelineError::TaskFailed` - a stage task panicked
    pub async fn run(
        &self,
        sources: &[SharedSource],
        cancel: &CancellationToken,
    ) -> VeritasResult<ReportBundle> {
        let report_id = veritas_core::new_report_id();
        let span = tracing::info_span!("report", %report_id, sources = sources.len());
        async {
            let started = std::time::Instant::now();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("report cancelled");
                    Err(PipelineError::Cancelled.into())
                }
                result = self.run_stages(report_id, sources) => {
                    // A bundle finished after cancellation is discarded.
                    if cancel.is_cancelled() {
                        tracing::info!("report cancelled");
                        return Err(PipelineError::Cancelled.into());
                    }
                    if let Ok(bundle) = &result {
                        tracing::info!(
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            degraded = bundle.degraded.len(),
                            "report complete"
                        );
                    }
                    result
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Run independent reports in parallel. Results come back in job order.
    pub async fn run_many(
        &self,
        jobs: Vec<ReportJob>,
    ) -> Vec<(String, VeritasResult<ReportBundle>)> {
        let mut set = JoinSet::new();
        let keys: Vec<String> = jobs.iter().map(|job| job.key.clone()).collect();
        for (position, job) in jobs.into_iter().enumerate() {
            let pipeline = self.clone();
            set.spawn(async move {
                let result = pipeline.run(&job.sources, &CancellationToken::new()).await;
                (position, result)
            });
        }

        let mut results: Vec<Option<VeritasResult<ReportBundle>>> = keys.iter().map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((position, result)) => results[position] = Some(result),
                Err(e) => tracing::error!(error = %e, "report task failed"),
            }
        }

        keys.into_iter()
            .zip(results)
            .map(|(key, result)| {
                let result = result.unwrap_or_else(|| {
                    Err(PipelineError::TaskFailed {
                        stage: "report".to_string(),
                        reason: "task aborted".to_string(),
                    }
                    .into())
                });
                (key, result)
            })
            .collect()
    }

    async fn run_stages(
        &self,
        report_id: veritas_core::ReportId,
        sources: &[SharedSource],
    ) -> VeritasResult<ReportBundle> {
        let dataset = Arc::new(self.normalize(sources).await?);
        let (kpis, anomalies) = self.analyze(&dataset).await?;
        let mut degraded = Vec::new();

        if kpis.records.is_empty() {
            degraded.push(DegradedSection {
                stage: Stage::Kpi,
                reason: "no complete rows in the current period".to_string(),
            });
        }

        let mut builder = ContextBuilder::new(report_id, &dataset).with_kpis(&kpis);
        let (anomaly_status, anomaly_threshold, scored, excluded) = match &anomalies {
            Ok(report) => {
                builder = builder.with_anomalies(report);
                (
                    SectionStatus::Complete,
                    Some(report.threshold),
                    report.records.clone(),
                    report.excluded_columns.clone(),
                )
            }
            Err(e) => {
                let reason = e.to_string();
                tracing::warn!(error = %reason, "anomaly detection degraded");
                builder = builder.with_anomaly_degraded(reason.clone());
                degraded.push(DegradedSection {
                    stage: Stage::Anomaly,
                    reason: reason.clone(),
                });
                (SectionStatus::degraded(reason), None, Vec::new(), Vec::new())
            }
        };
        let context = builder.build();

        let insight = match &self.provider {
            None => {
                let reason = LlmError::ProviderNotConfigured.to_string();
                degraded.push(DegradedSection {
                    stage: Stage::Insight,
                    reason: reason.clone(),
                });
                InsightSection::ContextOnly {
                    reason,
                    summary: context_summary(&context),
                }
            }
            Some(provider) => {
                let generator = InsightGenerator::new(provider.clone(), self.config.llm.clone())
                    .with_usage_tracker(self.usage.clone());
                match generator
                    .generate(&context)
                    .instrument(tracing::info_span!("insight"))
                    .await
                {
                    Ok(draft) => {
                        let guard = ConsistencyGuard::new(self.config.guard.clone());
                        let record = guard.verify(draft, &context);
                        InsightSection::Narrative { record }
                    }
                    Err(e) => {
                        let reason = e.to_string();
                        tracing::warn!(error = %reason, "falling back to context-only report");
                        degraded.push(DegradedSection {
                            stage: Stage::Insight,
                            reason: reason.clone(),
                        });
                        InsightSection::ContextOnly {
                            reason,
                            summary: context_summary(&context),
                        }
                    }
                }
            }
        };

        Ok(ReportBundle {
            report_id,
            dataset: dataset.summary.clone(),
            current_period: kpis.current_period,
            prior_period: kpis.prior_period,
            kpis: kpis.records,
            correlations: kpis.correlations,
            anomaly_status,
            anomaly_threshold,
            anomalies: scored,
            excluded_columns: excluded,
            insight,
            degraded,
        })
    }

    async fn normalize(&self, sources: &[SharedSource]) -> VeritasResult<Dataset> {
        let normalizer = Normalizer::new(self.config.ingest.clone());
        let sources = sources.to_vec();
        let dataset = tokio::task::spawn_blocking(move || {
            let refs: Vec<&dyn TableSource> = sources.iter().map(|s| s.as_ref()).collect();
            normalizer.normalize(&refs)
        })
        .await
        .map_err(|e| task_failed(Stage::Ingest, e))??;
        Ok(dataset)
    }

    /// KPI and anomaly stages, concurrently.
    async fn analyze(
        &self,
        dataset: &Arc<Dataset>,
    ) -> VeritasResult<(KpiReport, Result<AnomalyReport, AnomalyError>)> {
        let kpi_task = {
            let dataset = Arc::clone(dataset);
            let calculator = KpiCalculator::new(self.config.kpi.clone());
            tokio::task::spawn_blocking(move || calculator.compute(&dataset))
        };
        let anomaly_task = {
            let dataset = Arc::clone(dataset);
            let detector = AnomalyDetector::new(self.config.anomaly.clone());
            tokio::task::spawn_blocking(move || detector.detect(&dataset))
        };
        let (kpis, anomalies) = tokio::join!(kpi_task, anomaly_task);
        Ok((
            kpis.map_err(|e| task_failed(Stage::Kpi, e))?,
            anomaly_outcome(anomalies),
        ))
    }
}

impl std::fmt::Debug for ReportPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportPipeline")
            .field("provider", &self.provider.as_ref().map(|p| p.kind()))
            .field("usage", &self.usage)
            .finish()
    }
}

/// A failed detection task degrades the anomaly section like any other
/// detection error.
fn anomaly_outcome(
    joined: Result<Result<AnomalyReport, AnomalyError>, tokio::task::JoinError>,
) -> Result<AnomalyReport, AnomalyError> {
    joined.unwrap_or_else(|e| {
        tracing::error!(error = %e, "anomaly task failed");
        Err(AnomalyError::ModelFailed {
            reason: e.to_string(),
        })
    })
}

fn task_failed(stage: Stage, error: tokio::task::JoinError) -> VeritasError {
    PipelineError::TaskFailed {
        stage: stage.as_str().to_string(),
        reason: error.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use veritas_ingest::CsvSource;
    use veritas_llm::{MockNarrativeProvider, MockReply};
    use veritas_test_utils::fixtures::{short_csv, spike_config, spike_source};

    fn sources(source: CsvSource) -> Vec<SharedSource> {
        vec![Arc::new(source)]
    }

    #[tokio::test]
    async fn test_context_only_without_provider() {
        let mut config = spike_config();
        config.llm.provider = None;
        let pipeline = ReportPipeline::new(config).unwrap();
        let bundle = pipeline
            .run(&sources(spike_source()), &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(bundle.insight, InsightSection::ContextOnly { .. }));
        assert_eq!(bundle.degraded.len(), 1);
        assert_eq!(bundle.degraded[0].stage, Stage::Insight);
    }

    #[tokio::test]
    async fn test_failed_anomaly_task_degrades() {
        let joined = tokio::task::spawn_blocking(|| -> Result<AnomalyReport, AnomalyError> {
            panic!("forest exploded")
        })
        .await;
        match anomaly_outcome(joined) {
            Err(AnomalyError::ModelFailed { reason }) => {
                assert!(reason.contains("panicked"), "{reason}")
            }
            other => panic!("expected a model failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_insufficient_data_degrades_anomaly_section() {
        let pipeline = ReportPipeline::context_only(spike_config()).unwrap();
        let source = CsvSource::from_text("short.csv", short_csv(6));
        let bundle = pipeline
            .run(&sources(source), &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(bundle.anomaly_status, SectionStatus::Degraded { .. }));
        assert!(bundle.anomalies.is_empty());
        assert!(bundle
            .degraded
            .iter()
            .any(|d| d.stage == Stage::Anomaly && d.reason.contains("Insufficient data")));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let pipeline = ReportPipeline::context_only(spike_config()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = pipeline
            .run(&sources(spike_source()), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, VeritasError::Pipeline(PipelineError::Cancelled));
    }

    #[tokio::test]
    async fn test_cancel_during_generation() {
        let provider = Arc::new(MockNarrativeProvider::scripted(vec![MockReply::Delayed {
            delay: std::time::Duration::from_secs(30),
            text: "late".into(),
        }]));
        let mut config = spike_config();
        config.llm.timeout_seconds = 60;
        let pipeline = ReportPipeline::with_provider(config, provider.clone()).unwrap();
        let cancel = CancellationToken::new();
        let run = {
            let pipeline = pipeline.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { pipeline.run(&sources(spike_source()), &cancel).await })
        };
        while provider.calls() == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        cancel.cancel();
        let err = run.await.unwrap().unwrap_err();
        assert_eq!(err, VeritasError::Pipeline(PipelineError::Cancelled));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = spike_config();
        config.anomaly.contamination = 0.9;
        assert!(matches!(
            ReportPipeline::context_only(config),
            Err(VeritasError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_run_many_keeps_job_order() {
        let pipeline = ReportPipeline::with_provider(
            spike_config(),
            Arc::new(MockNarrativeProvider::summarizing()),
        )
        .unwrap();
        let jobs = vec![
            ReportJob::new("a.csv", sources(spike_source())),
            ReportJob::new("empty.csv", sources(CsvSource::from_text("empty.csv", "date,revenue\n"))),
            ReportJob::new("c.csv", sources(spike_source())),
        ];
        let results = pipeline.run_many(jobs).await;
        let keys: Vec<&str> = results.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a.csv", "empty.csv", "c.csv"]);
        assert!(results[0].1.is_ok());
        assert!(matches!(results[1].1, Err(VeritasError::Ingest(_))));
        assert!(results[2].1.is_ok());
        assert_eq!(pipeline.usage().requests(), 2);
    }
}
