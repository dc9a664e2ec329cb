//! Finalized report bundle, the sole output contract of the pipeline.

use crate::{
    AnomalyRecord, CorrelationRecord, DatasetSummary, InsightRecord, KpiRecord, PeriodBounds,
    ReportId, SectionStatus,
};
use serde::{Deserialize, Serialize};

/// Pipeline stage names used when reporting degradation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Ingest,
    Kpi,
    Anomaly,
    Insight,
    Guardrail,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingest => "ingest",
            Self::Kpi => "kpi",
            Self::Anomaly => "anomaly",
            Self::Insight => "insight",
            Self::Guardrail => "guardrail",
        }
    }
}

/// A section that could not be fully produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradedSection {
    pub stage: Stage,
    pub reason: String,
}

/// Narrative section of the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum InsightSection {
    /// Guardrail-finalized narrative
    Narrative { record: InsightRecord },
    /// Generation was unavailable; the report carries a deterministic
    /// summary rendered from the context
    ContextOnly { reason: String, summary: String },
}

impl InsightSection {
    pub fn record(&self) -> Option<&InsightRecord> {
        match self {
            Self::Narrative { record } => Some(record),
            Self::ContextOnly { .. } => None,
        }
    }
}

/// Everything the report-assembly layer needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportBundle {
    pub report_id: ReportId,
    pub dataset: DatasetSummary,
    pub current_period: Option<PeriodBounds>,
    pub prior_period: Option<PeriodBounds>,
    pub kpis: Vec<KpiRecord>,
    pub correlations: Vec<CorrelationRecord>,
    pub anomaly_status: SectionStatus,
    pub anomaly_threshold: Option<f64>,
    /// All scored rows, score descending; flagged rows are marked
    pub anomalies: Vec<AnomalyRecord>,
    /// Metrics excluded from the anomaly feature matrix
    pub excluded_columns: Vec<String>,
    pub insight: InsightSection,
    /// Sections that were degraded, in stage order
    pub degraded: Vec<DegradedSection>,
}

impl ReportBundle {
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }

    /// Flagged anomalies only.
    pub fn flagged_anomalies(&self) -> impl Iterator<Item = &AnomalyRecord> {
        self.anomalies.iter().filter(|a| a.flagged)
    }
}
