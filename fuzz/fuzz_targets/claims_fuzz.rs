//! Fuzz the consistency guard with arbitrary narrative text.
//!
//! Run with: cargo +nightly fuzz run claims_fuzz -- -max_total_time=60

#![no_main]

use chrono::{Duration, TimeZone, Utc};
use libfuzzer_sys::fuzz_target;
use veritas_context::ContextBuilder;
use veritas_core::{Dataset, InsightRecord, Row, Schema, ValidationStatus};
use veritas_guard::ConsistencyGuard;

fn dataset() -> Dataset {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let rows = (0..12)
        .map(|i| {
            Row::new(start + Duration::days(i))
                .with_metric("revenue", 100.0 + (i * 7 % 11) as f64)
                .with_dimension("region", if i % 2 == 0 { "East" } else { "West" })
        })
        .collect();
    Dataset::from_rows(
        Schema::new("date")
            .with_metrics(["revenue"])
            .with_dimensions(["region"]),
        rows,
    )
}

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let dataset = dataset();
        let context = ContextBuilder::new(uuid::Uuid::nil(), &dataset).build();
        let guard = ConsistencyGuard::default();

        let draft = InsightRecord::draft(context.report_id, "mock", "fuzz", text, None);
        let record = guard.verify(draft, &context);
        assert!(record.finalized);

        let worst = record
            .claims
            .iter()
            .map(|c| c.status.severity())
            .max()
            .unwrap_or(ValidationStatus::Verified);
        assert_eq!(record.status, worst, "document status is the worst claim status");

        // Verification is idempotent on finalized records.
        let again = guard.verify(record.clone(), &context);
        assert_eq!(again, record);
    }
});
