//! Veritas Test Utilities
//!
//! Shared test infrastructure for the Veritas workspace:
//! - Fixtures for the canonical scenarios (revenue spike, split sources)
//! - Proptest generators for datasets and configuration
//! - Mock narrative providers
//! - Custom assertions for Veritas-specific outcomes

// Re-export the mock provider from its source crate
pub use veritas_llm::{MockNarrativeProvider, MockReply};

pub use veritas_ingest::{CsvSource, JsonSource, QueryResultSource, TableSource};

pub use veritas_core::{
    AnomalyConfig, Claim, ClaimKind, ClaimStatus, Dataset, GuardConfig, IngestError,
    InsightRecord, LlmError, PeriodSpec, ProviderConfig, ProviderKind, RetryConfig, Row, Schema,
    Timestamp, ValidationStatus, VeritasConfig, VeritasError, VeritasResult,
};

use chrono::{Duration, TimeZone, Utc};

/// Midnight UTC on the n-th (1-based) day of January 2024.
pub fn day(n: u32) -> Timestamp {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
        + Duration::days(n as i64 - 1)
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built inputs for the scenarios the pipeline is judged on.

    use super::*;

    /// 1-based day carrying the revenue spike.
    pub const SPIKE_DAY: usize = 15;

    /// Baseline revenue for a 0-based row index.
    pub fn base_revenue(i: usize) -> f64 {
        100.0 + ((i * 7) % 11) as f64
    }

    /// Orders for a 0-based row index.
    pub fn orders(i: usize) -> f64 {
        20.0 + ((i * 3) % 5) as f64
    }

    /// Thirty daily rows where day 15's revenue is ten times the mean of
    /// the other days.
    pub fn spike_csv() -> String {
        let others: Vec<f64> = (0..30)
            .filter(|i| i + 1 != SPIKE_DAY)
            .map(base_revenue)
            .collect();
        let spike = 10.0 * others.iter().sum::<f64>() / others.len() as f64;

        let mut csv = String::from("date,region,revenue,orders\n");
        for i in 0..30 {
            let revenue = if i + 1 == SPIKE_DAY {
                spike
            } else {
                base_revenue(i)
            };
            csv.push_str(&format!(
                "{},west,{:.2},{}\n",
                day(i as u32 + 1).format("%Y-%m-%d"),
                revenue,
                orders(i)
            ));
        }
        csv
    }

    pub fn spike_source() -> CsvSource {
        CsvSource::from_text("daily_sales.csv", spike_csv())
    }

    /// Week containing the spike, `[day 15, day 22)`, against the week before.
    pub fn spike_period() -> PeriodSpec {
        PeriodSpec::DateRange {
            start: day(15),
            end: day(22),
        }
    }

    /// Report configuration for the spike scenario with the mock provider.
    pub fn spike_config() -> VeritasConfig {
        let mut config = VeritasConfig::default_report();
        config.kpi.period = spike_period();
        config.llm.provider = Some(ProviderConfig::new(ProviderKind::Mock));
        config.llm.timeout_seconds = 5;
        config.llm.retry = fast_retry(2);
        config
    }

    /// Retry settings with millisecond backoff.
    pub fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            backoff_multiplier: 2.0,
        }
    }

    /// Two sources sharing the date key with disjoint metric columns.
    ///
    /// Revenue covers days 1-10, orders covers days 5-12.
    pub fn split_sources() -> (CsvSource, CsvSource) {
        let mut revenue = String::from("date,revenue\n");
        for i in 0..10 {
            revenue.push_str(&format!(
                "{},{}\n",
                day(i as u32 + 1).format("%Y-%m-%d"),
                base_revenue(i)
            ));
        }
        let mut orders_csv = String::from("date;orders\n");
        for i in 4..12 {
            orders_csv.push_str(&format!(
                "{};{}\n",
                day(i as u32 + 1).format("%Y-%m-%d"),
                orders(i)
            ));
        }
        (
            CsvSource::from_text("revenue.csv", revenue),
            CsvSource::from_text("orders.csv", orders_csv),
        )
    }

    /// A short series the anomaly detector refuses to fit.
    pub fn short_csv(rows: usize) -> String {
        let mut csv = String::from("date,revenue\n");
        for i in 0..rows {
            csv.push_str(&format!(
                "{},{}\n",
                day(i as u32 + 1).format("%Y-%m-%d"),
                base_revenue(i)
            ));
        }
        csv
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Veritas inputs.

    use super::*;
    use proptest::prelude::*;

    /// Positive metric values with occasional large outliers.
    pub fn arb_metric_series(len: usize) -> impl Strategy<Value = Vec<f64>> {
        prop::collection::vec(
            prop_oneof![
                9 => 50.0f64..150.0,
                1 => 500.0f64..2000.0,
            ],
            len,
        )
    }

    /// Daily dataset with two metrics and `len` complete rows.
    pub fn arb_dataset(min_rows: usize, max_rows: usize) -> impl Strategy<Value = Dataset> {
        (min_rows..=max_rows)
            .prop_flat_map(|len| (arb_metric_series(len), arb_metric_series(len)))
            .prop_map(|(revenue, orders)| {
                let rows = revenue
                    .iter()
                    .zip(&orders)
                    .enumerate()
                    .map(|(i, (r, o))| {
                        Row::new(day(i as u32 + 1))
                            .with_metric("revenue", *r)
                            .with_metric("orders", o.round())
                    })
                    .collect();
                Dataset::from_rows(
                    Schema::new("date").with_metrics(["revenue", "orders"]),
                    rows,
                )
            })
    }

    /// Daily CSV text with `len` rows, some revenue cells blank.
    pub fn arb_csv(min_rows: usize, max_rows: usize) -> impl Strategy<Value = String> {
        (min_rows..=max_rows)
            .prop_flat_map(|len| {
                (
                    arb_metric_series(len),
                    prop::collection::vec(prop::bool::weighted(0.1), len),
                )
            })
            .prop_map(|(values, blanks)| {
                let mut csv = String::from("date,revenue\n");
                for (i, (value, blank)) in values.iter().zip(&blanks).enumerate() {
                    let cell = if *blank && i > 0 {
                        String::new()
                    } else {
                        format!("{value:.2}")
                    };
                    csv.push_str(&format!(
                        "{},{}\n",
                        day(i as u32 + 1).format("%Y-%m-%d"),
                        cell
                    ));
                }
                csv
            })
    }

    pub fn arb_anomaly_config() -> impl Strategy<Value = AnomalyConfig> {
        (0.01f64..0.2, 10usize..60, any::<u64>()).prop_map(|(contamination, n_trees, seed)| {
            AnomalyConfig {
                contamination,
                n_trees,
                seed,
                ..AnomalyConfig::default()
            }
        })
    }

    pub fn arb_guard_config() -> impl Strategy<Value = GuardConfig> {
        (0.001f64..0.1).prop_map(|tolerance| GuardConfig {
            tolerance,
            ..GuardConfig::default()
        })
    }

    pub fn arb_retry_config() -> impl Strategy<Value = RetryConfig> {
        (1u32..5, 1u64..100, 100u64..1000, 1.0f32..3.0).prop_map(
            |(max_retries, initial_backoff_ms, max_backoff_ms, backoff_multiplier)| RetryConfig {
                max_retries,
                initial_backoff_ms,
                max_backoff_ms,
                backoff_multiplier,
            },
        )
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertion helpers for Veritas-specific outcomes.

    use super::*;

    /// Assert that a result failed with an ingestion error.
    #[track_caller]
    pub fn assert_ingest_error<T: std::fmt::Debug>(result: &VeritasResult<T>) {
        match result {
            Err(VeritasError::Ingest(_)) => {}
            other => panic!("Expected Ingest error, got: {:?}", other),
        }
    }

    /// Assert that a result failed with `EmptyDataset`.
    #[track_caller]
    pub fn assert_empty_dataset<T: std::fmt::Debug>(result: &VeritasResult<T>) {
        match result {
            Err(VeritasError::Ingest(IngestError::EmptyDataset { .. })) => {}
            other => panic!("Expected EmptyDataset, got: {:?}", other),
        }
    }

    /// Assert that a record has been through the guardrail.
    #[track_caller]
    pub fn assert_finalized(record: &InsightRecord) {
        assert!(record.finalized, "Record {} was never verified", record.record_id);
    }

    /// Assert that some claim of `kind` has `status`.
    #[track_caller]
    pub fn assert_claim(record: &InsightRecord, kind: ClaimKind, status: ClaimStatus) {
        assert!(
            record
                .claims
                .iter()
                .any(|c| c.kind == kind && c.status == status),
            "No {:?} claim with status {:?} in {:#?}",
            kind,
            status,
            record.claims
        );
    }

    /// Assert that every claim was verified.
    #[track_caller]
    pub fn assert_all_verified(record: &InsightRecord) {
        assert_finalized(record);
        let bad: Vec<&Claim> = record
            .claims
            .iter()
            .filter(|c| c.status != ClaimStatus::Verified)
            .collect();
        assert!(bad.is_empty(), "Unverified claims: {:#?}", bad);
        assert_eq!(record.status, ValidationStatus::Verified);
    }

    /// Assert that the generator gave up after its retries.
    #[track_caller]
    pub fn assert_generation_unavailable(error: &LlmError) {
        assert!(
            matches!(error, LlmError::GenerationUnavailable { .. }),
            "Expected GenerationUnavailable, got: {:?}",
            error
        );
    }
}
