//! Insight context and insight records.
//!
//! The [`InsightContext`] is the only factual basis the language model is
//! given, and the only ground truth the guardrail checks against. An
//! [`InsightRecord`] starts life as a draft from the generator and is
//! finalized exactly once by the guardrail.

use crate::{
    AnomalyRecord, CorrelationRecord, KpiRecord, PeriodBounds, ReportId, TokenUsage, Timestamp,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

// ============================================================================
// SECTION STATUS
// ============================================================================

/// Whether a report section was fully computed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum SectionStatus {
    Complete,
    Degraded { reason: String },
}

impl SectionStatus {
    pub fn degraded(reason: impl Into<String>) -> Self {
        Self::Degraded {
            reason: reason.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

// ============================================================================
// INSIGHT CONTEXT
// ============================================================================

/// Dataset facts exposed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextDataset {
    pub row_count: usize,
    pub complete_rows: usize,
    pub start: Option<Timestamp>,
    pub end: Option<Timestamp>,
    pub metrics: Vec<String>,
    pub dimensions: Vec<String>,
    /// Distinct values per dimension (capped)
    pub dimension_values: BTreeMap<String, Vec<String>>,
}

/// Structured, machine-readable bundle of KPIs and flagged anomalies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightContext {
    pub report_id: ReportId,
    pub dataset: ContextDataset,
    pub current_period: Option<PeriodBounds>,
    pub prior_period: Option<PeriodBounds>,
    pub kpis: Vec<KpiRecord>,
    pub correlations: Vec<CorrelationRecord>,
    pub anomaly_status: SectionStatus,
    pub anomaly_threshold: Option<f64>,
    /// Flagged anomalies only, most anomalous first
    pub anomalies: Vec<AnomalyRecord>,
}

impl InsightContext {
    /// Names of every metric in the context (columns and derived KPIs).
    pub fn metric_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.dataset.metrics.iter().map(String::as_str).collect();
        for kpi in &self.kpis {
            if !names.contains(&kpi.metric.as_str()) {
                names.push(kpi.metric.as_str());
            }
        }
        names
    }

    pub fn kpi(&self, metric: &str) -> Option<&KpiRecord> {
        self.kpis.iter().find(|k| k.metric == metric)
    }

    /// Serialize to pretty JSON for the prompt.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

// ============================================================================
// CLAIMS
// ============================================================================

/// Whole-document validation status. Ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Verified,
    Corrected,
    Rejected,
}

/// Outcome for a single extracted claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    /// Matches a context value within tolerance
    Verified,
    /// Refers to a real metric; the number was replaced with the true value
    Corrected,
    /// Refers to something absent from the context; the sentence was removed
    Rejected,
    /// Qualitative statement that cannot be checked mechanically
    Unverifiable,
}

impl ClaimStatus {
    /// Contribution to the whole-document status.
    pub fn severity(&self) -> ValidationStatus {
        match self {
            Self::Verified | Self::Unverifiable => ValidationStatus::Verified,
            Self::Corrected => ValidationStatus::Corrected,
            Self::Rejected => ValidationStatus::Rejected,
        }
    }
}

/// What a claim asserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimKind {
    /// "12.5%"
    Percent,
    /// "10x", "3 times"
    Multiplier,
    /// Plain or currency number, with optional k/m/bn suffix
    Amount,
    /// "day 15", "row 4"
    Ordinal,
    /// ISO or slash date
    Date,
    /// Four-digit year
    Year,
    /// "caused by ...", "due to ..."
    Cause,
    /// "in London", "at Store 5"
    Location,
    /// Business metric name absent from the context
    Metric,
    /// Speculative prose with nothing to check
    Qualitative,
}

/// A claim extracted from the narrative with its verification outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub kind: ClaimKind,
    /// Index of the sentence the claim was found in
    pub sentence_index: usize,
    /// Matched text as it appeared in the draft
    pub text: String,
    /// Metric the claim was attributed to
    pub metric: Option<String>,
    /// Numeric value asserted by the claim
    pub value: Option<f64>,
    /// Context value the claim was compared against
    pub matched_value: Option<f64>,
    /// Replacement text for corrected claims
    pub replacement: Option<String>,
    pub status: ClaimStatus,
    /// Short human-readable explanation
    pub note: String,
}

// ============================================================================
// INSIGHT RECORD
// ============================================================================

/// Generated narrative plus verification detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightRecord {
    pub record_id: Uuid,
    pub report_id: ReportId,
    pub provider: String,
    pub model: String,
    /// Narrative exactly as the model returned it
    pub draft: String,
    /// Narrative after guardrail rewrites (equals `draft` until finalized)
    pub narrative: String,
    pub status: ValidationStatus,
    pub claims: Vec<Claim>,
    /// Set when qualitative claims need a human look
    pub review_required: bool,
    pub usage: Option<TokenUsage>,
    pub generated_at: Timestamp,
    /// Set by the guardrail; a finalized record is never modified again
    pub finalized: bool,
}

impl InsightRecord {
    /// Create an unverified draft from generated text.
    pub fn draft(
        report_id: ReportId,
        provider: impl Into<String>,
        model: impl Into<String>,
        text: impl Into<String>,
        usage: Option<TokenUsage>,
    ) -> Self {
        let text = text.into();
        Self {
            record_id: Uuid::now_v7(),
            report_id,
            provider: provider.into(),
            model: model.into(),
            narrative: text.clone(),
            draft: text,
            status: ValidationStatus::Verified,
            claims: Vec::new(),
            review_required: false,
            usage,
            generated_at: Utc::now(),
            finalized: false,
        }
    }

    /// Freeze the record with the guardrail's verdict.
    ///
    /// The document status is the worst status among the claims.
    pub fn finalize(mut self, narrative: String, claims: Vec<Claim>) -> Self {
        self.status = claims
            .iter()
            .map(|c| c.status.severity())
            .max()
            .unwrap_or(ValidationStatus::Verified);
        self.review_required = claims
            .iter()
            .any(|c| c.status == ClaimStatus::Unverifiable);
        self.narrative = narrative;
        self.claims = claims;
        self.finalized = true;
        self
    }

    /// Claims with a given status.
    pub fn claims_with(&self, status: ClaimStatus) -> impl Iterator<Item = &Claim> {
        self.claims.iter().filter(move |c| c.status == status)
    }
}
