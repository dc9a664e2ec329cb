//! Plain-text rendering of a report bundle.

use std::fmt::Write;
use veritas_context::format_number;
use veritas_core::{
    ClaimStatus, InsightSection, PeriodBounds, PercentChange, ReportBundle, SectionStatus,
};

fn period_line(label: &str, period: &Option<PeriodBounds>) -> String {
    match period {
        Some(p) => format!(
            "{label}: {} to {} ({} rows)",
            p.start.format("%Y-%m-%d"),
            p.end.format("%Y-%m-%d"),
            p.rows
        ),
        None => format!("{label}: unavailable"),
    }
}

/// Render a bundle for a terminal.
pub fn render_text(bundle: &ReportBundle) -> String {
    let mut out = String::new();
    let summary = &bundle.dataset;

    // Writing to a String cannot fail.
    let _ = writeln!(out, "Report {}", bundle.report_id);
    let _ = writeln!(
        out,
        "Dataset: {} rows ({} complete), {}% complete",
        summary.row_count,
        summary.complete_rows,
        format_number(summary.completeness_pct)
    );
    for source in &summary.sources {
        let _ = writeln!(
            out,
            "  source {} ({} rows, sha256 {})",
            source.name,
            source.rows,
            &source.fingerprint[..source.fingerprint.len().min(12)]
        );
    }
    let _ = writeln!(out, "{}", period_line("Current period", &bundle.current_period));
    let _ = writeln!(out, "{}", period_line("Prior period", &bundle.prior_period));

    let _ = writeln!(out, "\nKPIs");
    if bundle.kpis.is_empty() {
        let _ = writeln!(out, "  none");
    }
    for kpi in &bundle.kpis {
        let baseline = kpi
            .baseline
            .map(format_number)
            .unwrap_or_else(|| "n/a".to_string());
        let change = match kpi.change {
            PercentChange::Percent(pct) => format!("{}%", format_number(pct)),
            PercentChange::Unknown => "unknown".to_string(),
        };
        let _ = writeln!(
            out,
            "  {} ({}): {} vs {} [{}]",
            kpi.metric,
            kpi.aggregation.as_str(),
            format_number(kpi.value),
            baseline,
            change
        );
    }

    let _ = writeln!(out, "\nAnomalies");
    match &bundle.anomaly_status {
        SectionStatus::Degraded { reason } => {
            let _ = writeln!(out, "  unavailable: {reason}");
        }
        SectionStatus::Complete => {
            let flagged: Vec<_> = bundle.flagged_anomalies().collect();
            if flagged.is_empty() {
                let _ = writeln!(out, "  none flagged");
            }
            for anomaly in flagged {
                let drivers: Vec<&str> =
                    anomaly.drivers.iter().map(|d| d.metric.as_str()).collect();
                let _ = writeln!(
                    out,
                    "  day {} ({}): score {} drivers [{}]",
                    anomaly.position,
                    anomaly.timestamp.format("%Y-%m-%d"),
                    format_number(anomaly.score),
                    drivers.join(", ")
                );
            }
        }
    }

    let _ = writeln!(out, "\nInsight");
    match &bundle.insight {
        InsightSection::Narrative { record } => {
            let _ = writeln!(out, "  {}", record.narrative);
            let _ = writeln!(
                out,
                "  status: {:?} ({} claims, {} rejected){}",
                record.status,
                record.claims.len(),
                record
                    .claims
                    .iter()
                    .filter(|c| c.status == ClaimStatus::Rejected)
                    .count(),
                if record.review_required {
                    ", review required"
                } else {
                    ""
                }
            );
        }
        InsightSection::ContextOnly { reason, summary } => {
            let _ = writeln!(out, "  {summary}");
            let _ = writeln!(out, "  (narrative unavailable: {reason})");
        }
    }

    if bundle.is_degraded() {
        let _ = writeln!(out, "\nDegraded sections");
        for section in &bundle.degraded {
            let _ = writeln!(out, "  {}: {}", section.stage.as_str(), section.reason);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CancellationToken, ReportPipeline, SharedSource};
    use std::sync::Arc;
    use veritas_test_utils::fixtures::{spike_config, spike_source};

    #[tokio::test]
    async fn test_render_context_only_report() {
        let pipeline = ReportPipeline::context_only(spike_config()).unwrap();
        let sources: Vec<SharedSource> = vec![Arc::new(spike_source())];
        let bundle = pipeline
            .run(&sources, &CancellationToken::new())
            .await
            .unwrap();
        let text = render_text(&bundle);
        assert!(text.contains("Dataset: 30 rows (30 complete)"));
        assert!(text.contains("source daily_sales.csv (30 rows"));
        assert!(text.contains("revenue (sum)"));
        assert!(text.contains("day 15 (2024-01-15)"));
        assert!(text.contains("narrative unavailable"));
        assert!(text.contains("Degraded sections\n  insight:"));
    }
}
