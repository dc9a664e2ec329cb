//! Veritas Guard - Consistency Guardrail
//!
//! Treats generated narrative as untrusted. Every numeric, temporal, causal,
//! locational and metric claim is extracted and checked against the
//! [`InsightContext`] the narrative was generated from:
//!
//! - **verified**: a context value matches within tolerance
//! - **corrected**: the claim names a real metric but the number drifted;
//!   the number is rewritten to the true value
//! - **rejected**: the claim refers to something absent from the context;
//!   the sentence is replaced
//! - **unverifiable**: grounded qualitative prose, kept and flagged for review

pub mod extract;
pub mod facts;

pub use extract::{split_sentences, Direction, Extracted, SentenceScan};
pub use facts::{rounding_unit, within_rounding, within_tolerance, FactIndex, MetricMention};

use extract::{content_words, exogenous_terms, is_anomaly_word, scan_sentence};
use std::ops::Range;
use veritas_context::format_number;
use veritas_core::{Claim, ClaimKind, ClaimStatus, GuardConfig, InsightContext, InsightRecord};

// ============================================================================
// CONSISTENCY GUARD
// ============================================================================

/// Verifies narrative text against its insight context.
#[derive(Debug, Clone, Default)]
pub struct ConsistencyGuard {
    config: GuardConfig,
}

impl ConsistencyGuard {
    pub fn new(config: GuardConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Verify a draft record and freeze it.
    ///
    /// A record that is already finalized is returned unchanged.
    pub fn verify(&self, record: InsightRecord, context: &InsightContext) -> InsightRecord {
        if record.finalized {
            tracing::warn!(
                record_id = %record.record_id,
                "insight record already finalized; skipping verification"
            );
            return record;
        }
        let (narrative, claims) = self.check_text(&record.draft, context);
        let record = record.finalize(narrative, claims);
        tracing::info!(
            report_id = %record.report_id,
            status = ?record.status,
            claims = record.claims.len(),
            rejected = record.claims_with(ClaimStatus::Rejected).count(),
            corrected = record.claims_with(ClaimStatus::Corrected).count(),
            review_required = record.review_required,
            "narrative verified"
        );
        record
    }

    /// Check free text, returning the rewritten text and every claim found.
    pub fn check_text(&self, text: &str, context: &InsightContext) -> (String, Vec<Claim>) {
        let index = FactIndex::from_context(context);
        let mut out = String::with_capacity(text.len());
        let mut claims = Vec::new();
        let mut cursor = 0;

        for (sentence_index, range) in split_sentences(text).into_iter().enumerate() {
            out.push_str(&text[cursor..range.start]);
            cursor = range.end;
            let sentence = &text[range];
            let checked = self.check_sentence(sentence, sentence_index, &index);

            if checked.claims.iter().any(|c| c.status == ClaimStatus::Rejected) {
                tracing::debug!(sentence_index, sentence, "sentence rejected");
                out.push_str(&self.config.replacement_sentence);
            } else {
                let mut rewritten = sentence.to_string();
                let mut edits = checked.edits;
                edits.sort_by(|a, b| b.0.start.cmp(&a.0.start));
                for (span, replacement) in edits {
                    rewritten.replace_range(span, &replacement);
                }
                out.push_str(&rewritten);
            }
            claims.extend(checked.claims);
        }
        out.push_str(&text[cursor..]);
        (out, claims)
    }

    fn check_sentence(&self, sentence: &str, sentence_index: usize, index: &FactIndex) -> Checked {
        let lower = sentence.to_ascii_lowercase();
        let scan = scan_sentence(sentence, index);
        let mentions = index.metric_mentions(&lower);
        let mut checked = Checked::default();
        let ctx = ClaimCtx {
            sentence,
            sentence_index,
            scan: &scan,
            mentions: &mentions,
            index,
        };

        for extracted in &scan.claims {
            if let Some((claim, edit)) = self.check_claim(&ctx, extracted) {
                checked.edits.extend(edit);
                checked.claims.push(claim);
            }
        }

        if checked.claims.is_empty() && scan.speculative {
            checked.claims.push(Claim {
                kind: ClaimKind::Qualitative,
                sentence_index,
                text: sentence.to_string(),
                metric: None,
                value: None,
                matched_value: None,
                replacement: None,
                status: ClaimStatus::Unverifiable,
                note: "speculative statement; needs review".to_string(),
            });
        }
        checked
    }

    fn check_claim(
        &self,
        ctx: &ClaimCtx<'_>,
        extracted: &Extracted,
    ) -> Option<(Claim, Option<Edit>)> {
        let mut claim = Claim {
            kind: extracted.kind,
            sentence_index: ctx.sentence_index,
            text: ctx.sentence[extracted.span.clone()].to_string(),
            metric: None,
            value: extracted.value.map(|v| v * extracted.scale),
            matched_value: None,
            replacement: None,
            status: ClaimStatus::Rejected,
            note: String::new(),
        };
        let mut edit = None;

        match extracted.kind {
            ClaimKind::Percent | ClaimKind::Multiplier | ClaimKind::Amount => {
                edit = self.check_number(ctx, extracted, &mut claim);
            }
            ClaimKind::Year => {
                let year = extracted.value.unwrap_or_default() as i32;
                if ctx.index.year_in_range(year) {
                    verified(&mut claim, "year within the data range");
                } else {
                    rejected(&mut claim, "year outside the data range");
                }
            }
            ClaimKind::Ordinal => {
                let position = extracted.value.unwrap_or_default() as usize;
                if ctx.scan.mentions_anomaly {
                    if ctx.index.is_flagged_position(position) {
                        verified(&mut claim, "flagged anomaly position");
                    } else {
                        rejected(&mut claim, "position is not a flagged anomaly");
                    }
                } else if (1..=ctx.index.row_count()).contains(&position) {
                    verified(&mut claim, "position within the dataset");
                } else {
                    rejected(&mut claim, "position outside the dataset");
                }
            }
            ClaimKind::Date => match extracted.date {
                None => rejected(&mut claim, "not a valid date"),
                Some(date) if ctx.scan.mentions_anomaly => {
                    if ctx.index.is_flagged_date(date) {
                        verified(&mut claim, "date of a flagged anomaly");
                    } else {
                        rejected(&mut claim, "date is not a flagged anomaly");
                    }
                }
                Some(date) => {
                    if ctx.index.is_known_date(date) || ctx.index.in_range(date) {
                        verified(&mut claim, "date within the data range");
                    } else {
                        rejected(&mut claim, "date outside the data range");
                    }
                }
            },
            ClaimKind::Cause => {
                let subject = extracted.subject.clone().unwrap_or_default();
                self.check_cause(ctx, &subject, &mut claim);
            }
            ClaimKind::Location => {
                let place = extracted.subject.clone().unwrap_or_default();
                if ctx.index.knows_location(&place) {
                    verified(&mut claim, "location present in the context");
                } else {
                    rejected(&mut claim, format!("location not present in the context: {place}"));
                }
            }
            ClaimKind::Metric => {
                let word = extracted.subject.clone().unwrap_or_default();
                if word.split_whitespace().all(|w| ctx.index.is_grounded_word(w)) {
                    return None;
                }
                rejected(&mut claim, format!("metric not present in the context: {word}"));
            }
            ClaimKind::Qualitative => {
                claim.status = ClaimStatus::Unverifiable;
            }
        }
        Some((claim, edit))
    }

    fn check_number(
        &self,
        ctx: &ClaimCtx<'_>,
        extracted: &Extracted,
        claim: &mut Claim,
    ) -> Option<Edit> {
        let tolerance = self.config.tolerance;
        let claimed = claim.value?;
        let unit = rounding_unit(extracted.decimals, extracted.scale);
        let matches = |actual: f64| {
            within_tolerance(claimed, actual, tolerance) || within_rounding(claimed, actual, unit)
        };

        if extracted.counted {
            match ctx.index.counts().find(|v| matches(*v)) {
                Some(actual) => {
                    claim.matched_value = Some(actual);
                    verified(claim, "matches a count in the context");
                }
                None => rejected(claim, "no matching count in the context"),
            }
            return None;
        }

        let metric = attribute(ctx.mentions, &extracted.span);
        claim.metric = metric.map(str::to_string);

        if extracted.kind == ClaimKind::Percent {
            let change_of = |m: &str| {
                ctx.index
                    .change_of(m)
                    .map(|c| if extracted.signed { c } else { c.abs() })
            };
            if let Some(m) = metric {
                if let Some(change) = change_of(m).filter(|c| matches(*c)) {
                    claim.matched_value = Some(change);
                    if self.contradicts_direction(ctx, extracted, m) {
                        rejected(claim, "direction contradicts the change");
                    } else {
                        verified(claim, "matches period-over-period change");
                    }
                    return None;
                }
            }
            // Another metric named in the same sentence.
            for mention in ctx.mentions {
                if let Some(change) = change_of(&mention.metric).filter(|c| matches(*c)) {
                    claim.metric = Some(mention.metric.clone());
                    claim.matched_value = Some(change);
                    if self.contradicts_direction(ctx, extracted, &mention.metric) {
                        rejected(claim, "direction contradicts the change");
                    } else {
                        verified(claim, "matches period-over-period change");
                    }
                    return None;
                }
            }
        }

        if let Some(actual) = ctx
            .index
            .candidates(metric, extracted.kind)
            .into_iter()
            .find(|v| matches(*v))
        {
            claim.matched_value = Some(actual);
            verified(claim, "matches context value");
            return None;
        }

        if extracted.kind == ClaimKind::Amount && ctx.mentions.is_empty() {
            if let Some(actual) = ctx.index.unattributed().find(|v| matches(*v)) {
                claim.matched_value = Some(actual);
                verified(claim, "matches context value");
                return None;
            }
        }

        let Some(m) = metric else {
            rejected(claim, "no matching value in the context");
            return None;
        };
        let Some(actual) = ctx.index.preferred(m, extracted.kind, claimed) else {
            let kind = kind_name(extracted.kind);
            rejected(claim, format!("no {kind} value for {m} in the context"));
            return None;
        };
        if extracted.kind == ClaimKind::Percent && self.contradicts_direction(ctx, extracted, m) {
            claim.matched_value = Some(actual);
            rejected(claim, "direction contradicts the change");
            return None;
        }

        let shown = match extracted.kind {
            ClaimKind::Percent if extracted.signed => {
                format!("{}{}", if actual >= 0.0 { "+" } else { "" }, format_number(actual))
            }
            ClaimKind::Percent => format_number(actual.abs()),
            _ => format_number(actual / extracted.scale),
        };
        claim.matched_value = Some(actual);
        claim.replacement = Some(shown.clone());
        claim.status = ClaimStatus::Corrected;
        claim.note = format!("drifted from {m}; corrected to {shown}");
        extracted.number_span.clone().map(|span| (span, shown))
    }

    fn check_cause(&self, ctx: &ClaimCtx<'_>, subject: &str, claim: &mut Claim) {
        let lower = subject.to_ascii_lowercase();
        let ungrounded = exogenous_terms(&lower)
            .into_iter()
            .any(|term| !term.split_whitespace().all(|w| ctx.index.is_grounded_word(w)));
        if ungrounded {
            rejected(claim, format!("cause not present in the context: {subject}"));
            return;
        }

        let words = content_words(&lower);
        let mentioned = !ctx.index.metric_mentions(&lower).is_empty();
        let grounded = words.iter().any(|w| {
            ctx.index.is_grounded_word(w) || is_anomaly_word(w) || GROUNDED_WORDS.contains(w)
        });
        if words.is_empty() || mentioned || grounded {
            claim.status = ClaimStatus::Unverifiable;
            claim.note = "causal statement; needs review".to_string();
        } else {
            rejected(claim, format!("cause not present in the context: {subject}"));
        }
    }

    /// The direction word nearest a percentage contradicts the metric's change.
    fn contradicts_direction(
        &self,
        ctx: &ClaimCtx<'_>,
        extracted: &Extracted,
        metric: &str,
    ) -> bool {
        let Some(change) = ctx.index.change_of(metric).filter(|c| *c != 0.0) else {
            return false;
        };
        let nearest = ctx
            .scan
            .directions
            .iter()
            .min_by_key(|(pos, _)| pos.abs_diff(extracted.span.start));
        match nearest {
            Some((_, Direction::Up)) => change < 0.0,
            Some((_, Direction::Down)) => change > 0.0,
            None => false,
        }
    }
}

/// Words that refer to the data itself rather than an outside cause.
const GROUNDED_WORDS: &[&str] = &[
    "day", "days", "row", "rows", "period", "prior", "current", "unknown",
];

type Edit = (Range<usize>, String);

#[derive(Default)]
struct Checked {
    claims: Vec<Claim>,
    edits: Vec<Edit>,
}

struct ClaimCtx<'a> {
    sentence: &'a str,
    sentence_index: usize,
    scan: &'a SentenceScan,
    mentions: &'a [MetricMention],
    index: &'a FactIndex,
}

/// Metric a number refers to: the nearest preceding mention, else the
/// nearest following one.
fn attribute<'a>(mentions: &'a [MetricMention], span: &Range<usize>) -> Option<&'a str> {
    mentions
        .iter()
        .filter(|m| m.end <= span.start)
        .next_back()
        .or_else(|| mentions.iter().find(|m| m.start >= span.end))
        .map(|m| m.metric.as_str())
}

fn verified(claim: &mut Claim, note: impl Into<String>) {
    claim.status = ClaimStatus::Verified;
    claim.note = note.into();
}

fn rejected(claim: &mut Claim, note: impl Into<String>) {
    claim.status = ClaimStatus::Rejected;
    claim.note = note.into();
}

fn kind_name(kind: ClaimKind) -> &'static str {
    match kind {
        ClaimKind::Percent => "percentage",
        ClaimKind::Multiplier => "ratio",
        _ => "matching",
    }
}

// ============================================================================
// TEST SUPPORT
// ============================================================================

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;
    use uuid::Uuid;
    use veritas_core::{
        Aggregation, AnomalyDriver, AnomalyRecord, ContextDataset, InsightContext, KpiKind,
        KpiRecord, PercentChange, PeriodBounds, SectionStatus, Timestamp,
    };

    fn day(d: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
    }

    pub fn kpi(metric: &str, aggregation: Aggregation, value: f64, baseline: f64) -> KpiRecord {
        KpiRecord {
            metric: metric.to_string(),
            kind: KpiKind::Column,
            aggregation,
            value,
            baseline: Some(baseline),
            change: PercentChange::between(value, Some(baseline)),
            current_points: 7,
            prior_points: 7,
        }
    }

    /// Thirty January days with a revenue spike on day 15.
    pub fn spike_context() -> InsightContext {
        InsightContext {
            report_id: Uuid::nil(),
            dataset: ContextDataset {
                row_count: 30,
                complete_rows: 30,
                start: Some(day(1)),
                end: Some(day(30)),
                metrics: vec!["revenue".into(), "orders".into(), "conversion_rate".into()],
                dimensions: vec!["region".into()],
                dimension_values: BTreeMap::from([(
                    "region".to_string(),
                    vec!["East".to_string(), "West".to_string()],
                )]),
            },
            current_period: Some(PeriodBounds {
                start: day(24),
                end: day(30),
                rows: 7,
            }),
            prior_period: Some(PeriodBounds {
                start: day(17),
                end: day(23),
                rows: 7,
            }),
            kpis: vec![
                kpi("revenue", Aggregation::Sum, 1500.0, 1000.0),
                kpi("orders", Aggregation::Sum, 270.0, 300.0),
                kpi("conversion_rate", Aggregation::Mean, 3.2, 3.0),
            ],
            correlations: Vec::new(),
            anomaly_status: SectionStatus::Complete,
            anomaly_threshold: Some(0.62),
            anomalies: vec![AnomalyRecord {
                row_index: 14,
                position: 15,
                timestamp: day(15),
                score: 0.71,
                flagged: true,
                drivers: vec![AnomalyDriver {
                    metric: "revenue".into(),
                    value: 1000.0,
                    median: 100.0,
                    ratio: Some(10.0),
                    robust_z: 60.7,
                }],
                dimensions: BTreeMap::from([("region".to_string(), "West".to_string())]),
            }],
        }
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================
