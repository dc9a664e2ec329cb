//! Deterministic context-only summary.
//!
//! Used in place of a generated narrative when the provider is unavailable.
//! Every number comes straight from the context, so the text needs no
//! verification.

use std::fmt::Write;

use veritas_core::{InsightContext, PercentChange, SectionStatus};

/// Format a number with at most two decimals, dropping trailing zeros.
pub fn format_number(value: f64) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    let rounded = format!("{value:.2}");
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    match trimmed {
        "-0" => "0".to_string(),
        other => other.to_string(),
    }
}

/// Summarize a context as plain sentences.
pub fn context_summary(context: &InsightContext) -> String {
    let mut out = String::new();
    let dataset = &context.dataset;
    let _ = write!(
        out,
        "The dataset contains {} rows ({} complete rows)",
        dataset.row_count, dataset.complete_rows
    );
    if let (Some(start), Some(end)) = (dataset.start, dataset.end) {
        let _ = write!(
            out,
            ", from {} to {}",
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d")
        );
    }
    out.push('.');

    for kpi in &context.kpis {
        let _ = write!(
            out,
            " {} was {} ({})",
            kpi.metric,
            format_number(kpi.value),
            kpi.aggregation.as_str()
        );
        match kpi.change {
            PercentChange::Percent(pct) => {
                let _ = write!(
                    out,
                    ", {}{}% versus the prior period.",
                    if pct >= 0.0 { "+" } else { "" },
                    format_number(pct)
                );
            }
            PercentChange::Unknown => out.push_str(", change versus the prior period unknown."),
        }
    }

    match &context.anomaly_status {
        SectionStatus::Degraded { reason } => {
            let _ = write!(out, " Anomaly detection was unavailable: {reason}.");
        }
        SectionStatus::Complete if context.anomalies.is_empty() => {
            out.push_str(" No anomalous rows were flagged.");
        }
        SectionStatus::Complete => {
            let _ = write!(out, " {} anomalous rows were flagged:", context.anomalies.len());
            for (i, anomaly) in context.anomalies.iter().enumerate() {
                let _ = write!(
                    out,
                    "{} day {} ({})",
                    if i == 0 { "" } else { ";" },
                    anomaly.position,
                    anomaly.timestamp.format("%Y-%m-%d")
                );
                if let Some(driver) = anomaly.drivers.first() {
                    let _ = write!(out, " {} {}", driver.metric, format_number(driver.value));
                    if let Some(ratio) = driver.ratio {
                        let _ = write!(out, ", {}x the median", format_number(ratio));
                    }
                }
            }
            out.push('.');
        }
    }
    out
}
