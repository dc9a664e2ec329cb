//! Derived business ratios: ad performance (CTR, conversion rate, CPC, ROAS)
//! and sales (revenue per customer, average order value).

use veritas_core::{Aggregation, KpiKind, KpiRecord, PercentChange, Row};

use crate::window::Windows;

/// A ratio of two column sums.
#[derive(Debug, Clone, Copy)]
pub struct DerivedRule {
    pub name: &'static str,
    /// Accepted numerator column names, in preference order
    pub numerators: &'static [&'static str],
    /// Accepted denominator column names, in preference order
    pub denominators: &'static [&'static str],
    pub scale: f64,
}

pub const DERIVED_RULES: [DerivedRule; 6] = [
    DerivedRule {
        name: "ctr",
        numerators: &["clicks"],
        denominators: &["impressions"],
        scale: 100.0,
    },
    DerivedRule {
        name: "conversion_rate",
        numerators: &["conversions", "orders"],
        denominators: &["clicks"],
        scale: 100.0,
    },
    DerivedRule {
        name: "cost_per_click",
        numerators: &["spend", "cost"],
        denominators: &["clicks"],
        scale: 1.0,
    },
    DerivedRule {
        name: "roas",
        numerators: &["revenue", "sales", "conversion_value", "conversions"],
        denominators: &["spend", "cost"],
        scale: 1.0,
    },
    DerivedRule {
        name: "revenue_per_customer",
        numerators: &["revenue", "sales"],
        denominators: &["customers", "users", "transactions"],
        scale: 1.0,
    },
    DerivedRule {
        name: "avg_order_value",
        numerators: &["revenue", "sales"],
        denominators: &["orders", "transactions"],
        scale: 1.0,
    },
];

fn find_column<'m>(metrics: &'m [String], candidates: &[&str]) -> Option<&'m str> {
    candidates.iter().find_map(|candidate| {
        metrics
            .iter()
            .find(|m| m.eq_ignore_ascii_case(candidate))
            .map(String::as_str)
    })
}

fn ratio(rows: &[&Row], numerator: &str, denominator: &str, scale: f64) -> Option<f64> {
    let num: f64 = rows.iter().filter_map(|r| r.metric(numerator)).sum();
    let den: f64 = rows.iter().filter_map(|r| r.metric(denominator)).sum();
    (den != 0.0 && !rows.is_empty()).then(|| num / den * scale)
}

/// Derived records for every rule whose columns exist. A rule is skipped
/// when the dataset already has a column of the same name or the current
/// denominator sums to zero.
pub fn derived_records(metrics: &[String], windows: &Windows<'_>) -> Vec<KpiRecord> {
    let mut out = Vec::new();
    for rule in &DERIVED_RULES {
        if metrics.iter().any(|m| m.eq_ignore_ascii_case(rule.name)) {
            continue;
        }
        let (Some(numerator), Some(denominator)) = (
            find_column(metrics, rule.numerators),
            find_column(metrics, rule.denominators),
        ) else {
            continue;
        };
        let Some(value) = ratio(&windows.current, numerator, denominator, rule.scale) else {
            continue;
        };
        let baseline = windows
            .prior
            .as_ref()
            .and_then(|rows| ratio(rows, numerator, denominator, rule.scale));
        out.push(KpiRecord {
            metric: rule.name.to_string(),
            kind: KpiKind::Derived {
                numerator: numerator.to_string(),
                denominator: denominator.to_string(),
            },
            aggregation: Aggregation::Mean,
            value,
            baseline,
            change: PercentChange::between(value, baseline),
            current_points: windows.current.len(),
            prior_points: windows.prior.as_ref().map_or(0, Vec::len),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::resolve_windows;
    use chrono::{Duration, TimeZone, Utc};
    use veritas_core::PeriodSpec;

    fn rows(values: &[(f64, f64, f64)]) -> Vec<Row> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, (impressions, clicks, spend))| {
                Row::new(start + Duration::days(i as i64))
                    .with_metric("Impressions", *impressions)
                    .with_metric("clicks", *clicks)
                    .with_metric("spend", *spend)
            })
            .collect()
    }

    fn metrics() -> Vec<String> {
        vec!["Impressions".into(), "clicks".into(), "spend".into()]
    }

    #[test]
    fn test_ctr_and_cpc() {
        let owned = rows(&[(1000.0, 10.0, 5.0), (1000.0, 30.0, 15.0)]);
        let refs: Vec<&Row> = owned.iter().collect();
        let windows = resolve_windows(&refs, &PeriodSpec::LastRows(1));
        let records = derived_records(&metrics(), &windows);
        let names: Vec<&str> = records.iter().map(|r| r.metric.as_str()).collect();
        assert_eq!(names, vec!["ctr", "cost_per_click"]);

        let ctr = &records[0];
        assert!((ctr.value - 3.0).abs() < 1e-12);
        assert_eq!(ctr.baseline, Some(1.0));
        assert!((ctr.change.value().unwrap() - 200.0).abs() < 1e-9);
        assert_eq!(
            ctr.kind,
            KpiKind::Derived {
                numerator: "clicks".into(),
                denominator: "Impressions".into()
            }
        );
        assert!((records[1].value - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_roas_and_average_order_value() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let owned: Vec<Row> = [(400.0, 100.0, 8.0), (900.0, 150.0, 12.0)]
            .iter()
            .enumerate()
            .map(|(i, (revenue, spend, orders))| {
                Row::new(start + Duration::days(i as i64))
                    .with_metric("Revenue", *revenue)
                    .with_metric("spend", *spend)
                    .with_metric("orders", *orders)
            })
            .collect();
        let refs: Vec<&Row> = owned.iter().collect();
        let windows = resolve_windows(&refs, &PeriodSpec::LastRows(1));
        let names: Vec<String> = vec!["Revenue".into(), "spend".into(), "orders".into()];
        let records = derived_records(&names, &windows);
        let metrics: Vec<&str> = records.iter().map(|r| r.metric.as_str()).collect();
        assert_eq!(metrics, vec!["roas", "avg_order_value"]);

        let roas = &records[0];
        assert_eq!(roas.value, 6.0);
        assert_eq!(roas.baseline, Some(4.0));
        assert_eq!(roas.change.value(), Some(50.0));
        assert_eq!(
            roas.kind,
            KpiKind::Derived {
                numerator: "Revenue".into(),
                denominator: "spend".into()
            }
        );

        let aov = &records[1];
        assert_eq!(aov.value, 75.0);
        assert_eq!(aov.baseline, Some(50.0));
        assert_eq!(aov.aggregation, Aggregation::Mean);
    }

    #[test]
    fn test_zero_denominator_skips_rule() {
        let owned = rows(&[(0.0, 0.0, 5.0)]);
        let refs: Vec<&Row> = owned.iter().collect();
        let windows = resolve_windows(&refs, &PeriodSpec::LastRows(1));
        assert!(derived_records(&metrics(), &windows).is_empty());
    }

    #[test]
    fn test_existing_column_wins() {
        let mut names = metrics();
        names.push("ctr".into());
        let owned = rows(&[(100.0, 10.0, 5.0)]);
        let refs: Vec<&Row> = owned.iter().collect();
        let windows = resolve_windows(&refs, &PeriodSpec::LastRows(1));
        let records = derived_records(&names, &windows);
        assert!(records.iter().all(|r| r.metric != "ctr"));
    }
}
