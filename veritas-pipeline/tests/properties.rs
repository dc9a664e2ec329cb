//! Property tests across stage boundaries.

use proptest::prelude::*;
use std::sync::Arc;
use veritas_anomaly::AnomalyDetector;
use veritas_context::{context_summary, ContextBuilder};
use veritas_core::{ClaimStatus, KpiConfig};
use veritas_guard::ConsistencyGuard;
use veritas_ingest::Normalizer;
use veritas_kpi::KpiCalculator;
use veritas_llm::InsightGenerator;
use veritas_test_utils::assertions::assert_generation_unavailable;
use veritas_test_utils::generators::{
    arb_anomaly_config, arb_csv, arb_dataset, arb_guard_config, arb_retry_config,
};
use veritas_test_utils::{CsvSource, LlmError, MockNarrativeProvider, MockReply, VeritasConfig};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_generated_csv_normalizes(csv in arb_csv(12, 40)) {
        let expected_rows = csv.lines().count() - 1;
        let source = CsvSource::from_text("generated.csv", csv);
        let dataset = Normalizer::default().normalize(&[&source]).unwrap();
        prop_assert_eq!(dataset.summary.row_count, expected_rows);
        prop_assert!(dataset.summary.completeness_pct <= 100.0);
        prop_assert!(dataset.summary.completeness_pct > 0.0);
    }

    #[test]
    fn prop_anomaly_scores_every_complete_row(
        dataset in arb_dataset(12, 50),
        config in arb_anomaly_config(),
    ) {
        let report = AnomalyDetector::new(config).detect(&dataset).unwrap();
        prop_assert_eq!(report.records.len(), dataset.complete_rows().count());
        prop_assert!(report.records.iter().all(|r| r.score > 0.0 && r.score <= 1.0));
        prop_assert!(report
            .records
            .windows(2)
            .all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn prop_context_summary_never_rejected(
        dataset in arb_dataset(12, 40),
        anomaly in arb_anomaly_config(),
        guard in arb_guard_config(),
    ) {
        let kpis = KpiCalculator::new(KpiConfig::default()).compute(&dataset);
        let anomalies = AnomalyDetector::new(anomaly).detect(&dataset).unwrap();
        let context = ContextBuilder::new(veritas_core::new_report_id(), &dataset)
            .with_kpis(&kpis)
            .with_anomalies(&anomalies)
            .build();
        let summary = context_summary(&context);
        let (_, claims) = ConsistencyGuard::new(guard).check_text(&summary, &context);
        prop_assert!(claims.iter().all(|c| c.status != ClaimStatus::Rejected), "{:#?}", claims);
    }

    #[test]
    fn prop_generation_gives_up_after_configured_attempts(retry in arb_retry_config()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();
        let provider = Arc::new(MockNarrativeProvider::scripted(vec![MockReply::Fail(
            LlmError::InvalidResponse {
                provider: "mock".to_string(),
                reason: "garbled".to_string(),
            },
        )]));
        let mut config = VeritasConfig::default_report().llm;
        config.retry = retry.clone();
        let generator = InsightGenerator::new(provider.clone(), config);

        let dataset = veritas_test_utils::fixtures::spike_source();
        let dataset = Normalizer::default().normalize(&[&dataset]).unwrap();
        let context = ContextBuilder::new(veritas_core::new_report_id(), &dataset).build();

        let error = runtime.block_on(generator.generate(&context)).unwrap_err();
        assert_generation_unavailable(&error);
        prop_assert_eq!(provider.calls() as u32, retry.max_retries.max(1));
    }
}
