//! Veritas Context - Insight context assembly
//!
//! Builds the [`InsightContext`] handed to the language model from the
//! KPI and anomaly outputs, renders it into a narrative request, and
//! produces the deterministic summary used when generation is unavailable.

pub mod prompt;
pub mod summary;

pub use prompt::{narrative_request, render_prompt, SYSTEM_INSTRUCTION};
pub use summary::{context_summary, format_number};

use veritas_core::{
    AnomalyRecord, AnomalyReport, ContextDataset, CorrelationRecord, Dataset, InsightContext,
    KpiRecord, KpiReport, PeriodBounds, ReportId, SectionStatus,
};

/// Distinct values kept per dimension in the context.
pub const MAX_DIMENSION_VALUES: usize = 25;

// ============================================================================
// CONTEXT BUILDER
// ============================================================================

/// Assembles an [`InsightContext`] from stage outputs.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    report_id: ReportId,
    dataset: ContextDataset,
    current_period: Option<PeriodBounds>,
    prior_period: Option<PeriodBounds>,
    kpis: Vec<KpiRecord>,
    correlations: Vec<CorrelationRecord>,
    anomaly_status: SectionStatus,
    anomaly_threshold: Option<f64>,
    anomalies: Vec<AnomalyRecord>,
}

impl ContextBuilder {
    /// Start a context for one report over a normalized dataset.
    pub fn new(report_id: ReportId, dataset: &Dataset) -> Self {
        let dimension_values = dataset
            .schema
            .dimensions
            .iter()
            .map(|dimension| {
                let mut values = dataset.dimension_values(dimension);
                values.truncate(MAX_DIMENSION_VALUES);
                (dimension.clone(), values)
            })
            .collect();
        Self {
            report_id,
            dataset: ContextDataset {
                row_count: dataset.summary.row_count,
                complete_rows: dataset.summary.complete_rows,
                start: dataset.summary.start,
                end: dataset.summary.end,
                metrics: dataset.schema.metrics.clone(),
                dimensions: dataset.schema.dimensions.clone(),
                dimension_values,
            },
            current_period: None,
            prior_period: None,
            kpis: Vec::new(),
            correlations: Vec::new(),
            anomaly_status: SectionStatus::degraded("anomaly detection not run"),
            anomaly_threshold: None,
            anomalies: Vec::new(),
        }
    }

    pub fn with_kpis(mut self, report: &KpiReport) -> Self {
        self.current_period = report.current_period;
        self.prior_period = report.prior_period;
        self.kpis = report.records.clone();
        self.correlations = report.correlations.clone();
        self
    }

    /// Attach flagged anomalies only, most anomalous first.
    pub fn with_anomalies(mut self, report: &AnomalyReport) -> Self {
        self.anomaly_status = SectionStatus::Complete;
        self.anomaly_threshold = Some(report.threshold);
        self.anomalies = report.flagged().cloned().collect();
        self
    }

    /// Record that anomaly detection could not run.
    pub fn with_anomaly_degraded(mut self, reason: impl Into<String>) -> Self {
        self.anomaly_status = SectionStatus::degraded(reason);
        self.anomaly_threshold = None;
        self.anomalies.clear();
        self
    }

    pub fn build(self) -> InsightContext {
        InsightContext {
            report_id: self.report_id,
            dataset: self.dataset,
            current_period: self.current_period,
            prior_period: self.prior_period,
            kpis: self.kpis,
            correlations: self.correlations,
            anomaly_status: self.anomaly_status,
            anomaly_threshold: self.anomaly_threshold,
            anomalies: self.anomalies,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_builder_keeps_only_flagged_anomalies() {
        let context = ContextBuilder::new(Uuid::nil(), &dataset())
            .with_kpis(&kpis())
            .with_anomalies(&anomalies())
            .build();
        assert_eq!(context.anomalies.len(), 1);
        assert_eq!(context.anomalies[0].position, 3);
        assert_eq!(context.anomaly_threshold, Some(0.81));
        assert!(context.anomaly_status.is_complete());
        assert_eq!(context.kpis.len(), 1);
    }

    #[test]
    fn test_builder_collects_dimension_values() {
        let context = ContextBuilder::new(Uuid::nil(), &dataset()).build();
        assert_eq!(
            context.dataset.dimension_values.get("region"),
            Some(&vec!["east".to_string(), "west".to_string()])
        );
        assert_eq!(context.dataset.row_count, 4);
    }

    #[test]
    fn test_degraded_anomaly_section() {
        let context = ContextBuilder::new(Uuid::nil(), &dataset())
            .with_anomalies(&anomalies())
            .with_anomaly_degraded("insufficient data")
            .build();
        assert!(context.anomalies.is_empty());
        assert_eq!(
            context.anomaly_status,
            SectionStatus::degraded("insufficient data")
        );
        assert!(context.anomaly_threshold.is_none());
    }

    #[test]
    fn test_anomaly_section_defaults_to_not_run() {
        let context = ContextBuilder::new(Uuid::nil(), &dataset()).build();
        assert!(!context.anomaly_status.is_complete());
    }
}
