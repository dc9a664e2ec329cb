//! Fuzz the normalizer with arbitrary delimited text.
//!
//! Run with: cargo +nightly fuzz run normalize_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use veritas_core::IngestError;
use veritas_ingest::{CsvSource, JsonSource, Normalizer};

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let normalizer = Normalizer::default();
        let csv = CsvSource::from_text("fuzz.csv", text);
        let json = JsonSource::from_text("fuzz.json", text);

        for result in [normalizer.normalize(&[&csv]), normalizer.normalize(&[&json])] {
            match result {
                Ok(dataset) => {
                    assert!(!dataset.rows.is_empty(), "a dataset never has zero rows");
                    assert!(
                        dataset.rows.windows(2).all(|w| w[0].timestamp <= w[1].timestamp),
                        "rows are ordered by timestamp"
                    );
                    assert!(dataset.summary.completeness_pct <= 100.0);
                }
                Err(IngestError::EmptyDataset { .. })
                | Err(IngestError::MissingTimestamp { .. })
                | Err(IngestError::SchemaConflict { .. })
                | Err(IngestError::SourceUnreadable { .. }) => {}
            }
        }
    }
});
