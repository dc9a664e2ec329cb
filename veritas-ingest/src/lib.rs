//! Veritas Ingest - Schema Normalizer
//!
//! Parses heterogeneous tabular sources into one canonical [`Dataset`]:
//! typed columns, a parsed timestamp key, outer-joined across sources and
//! gap-filled with a trailing mean.

pub mod impute;
pub mod infer;
pub mod merge;
pub mod source;

pub use impute::impute_trailing_mean;
pub use infer::{detect_timestamp_column, infer_kind, is_null, parse_number, parse_timestamp};
pub use merge::{outer_join, type_table, unify_schema, ColumnCoverage, TypedRow, TypedTable};
pub use source::{sniff_delimiter, CsvSource, JsonSource, QueryResultSource, RawTable, TableSource};

use veritas_core::{Dataset, IngestConfig, IngestError, IngestStats, SourceFingerprint};

/// Normalizes one or more table sources into a dataset.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    config: IngestConfig,
}

impl Normalizer {
    pub fn new(config: IngestConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Fetch every source and normalize the result.
    pub fn normalize(&self, sources: &[&dyn TableSource]) -> Result<Dataset, IngestError> {
        let tables = sources
            .iter()
            .map(|source| source.fetch_rows())
            .collect::<Result<Vec<_>, _>>()?;
        self.normalize_tables(tables)
    }

    /// Normalize tables that were already fetched.
    ///
    /// Secondary keys only take part in the join when every source carries
    /// them; otherwise they are ordinary dimensions.
    pub fn normalize_tables(&self, mut tables: Vec<RawTable>) -> Result<Dataset, IngestError> {
        if tables.is_empty() {
            return Err(IngestError::EmptyDataset {
                reason: "no sources supplied".to_string(),
            });
        }

        let keys: Vec<String> = self
            .config
            .secondary_keys
            .iter()
            .filter(|key| tables.iter().all(|t| t.column_index(key).is_some()))
            .cloned()
            .collect();

        let mut stats = IngestStats::default();
        let mut typed = Vec::with_capacity(tables.len());
        for table in &mut tables {
            let duplicates = table.dedup();
            let parsed = type_table(table, &self.config, &keys)?;
            tracing::debug!(
                source = %table.source_name,
                records = table.records.len(),
                duplicates,
                dropped = parsed.dropped_rows,
                malformed = table.malformed_lines,
                "parsed source"
            );
            stats.duplicate_rows += duplicates;
            stats.dropped_rows += parsed.dropped_rows;
            stats.malformed_lines += table.malformed_lines;
            stats.sources.push(SourceFingerprint {
                name: table.source_name.clone(),
                fingerprint: table.fingerprint.clone(),
                rows: parsed.rows.len(),
            });
            typed.push(parsed);
        }

        if typed.iter().all(|t| t.rows.is_empty()) {
            return Err(IngestError::EmptyDataset {
                reason: format!(
                    "no valid rows after parsing ({} dropped, {} malformed)",
                    stats.dropped_rows, stats.malformed_lines
                ),
            });
        }

        let schema = unify_schema(&typed)?;
        let mut rows = outer_join(&typed, &schema);
        let imputed = impute_trailing_mean(
            &mut rows,
            &schema.metrics,
            &keys,
            self.config.imputation_window,
            &ColumnCoverage::of(&typed),
        );

        let dataset = Dataset::new(schema, rows, stats);
        tracing::info!(
            rows = dataset.summary.row_count,
            complete = dataset.summary.complete_rows,
            imputed,
            metrics = dataset.schema.metrics.len(),
            dimensions = dataset.schema.dimensions.len(),
            "normalized dataset"
        );
        Ok(dataset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veritas_core::{MetricValue, RowStatus};

    #[test]
    fn test_normalize_single_csv() {
        let source = CsvSource::from_text(
            "sales.csv",
            "date,region,revenue\n\
             2024-01-01,west,10\n\
             2024-01-02,west,NA\n\
             2024-01-03,west,14\n\
             2024-01-03,west,14\n\
             bad,west,1\n",
        );
        let dataset = Normalizer::default().normalize(&[&source]).unwrap();
        assert_eq!(dataset.schema.timestamp_column, "date");
        assert_eq!(dataset.schema.metrics, vec!["revenue"]);
        assert_eq!(dataset.schema.dimensions, vec!["region"]);
        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.summary.duplicate_rows, 1);
        assert_eq!(dataset.summary.dropped_rows, 1);
        assert_eq!(dataset.rows[1].metric_value("revenue"), MetricValue::Imputed(10.0));
        assert_eq!(dataset.summary.sources[0].rows, 3);
    }

    #[test]
    fn test_normalize_no_sources_is_empty() {
        let err = Normalizer::default().normalize(&[]).unwrap_err();
        assert!(matches!(err, IngestError::EmptyDataset { .. }));
    }

    #[test]
    fn test_normalize_all_rows_dropped_is_empty() {
        let source = CsvSource::from_text("s.csv", "date,revenue\n2024-01-01,1\n")
            .with_delimiter(b',');
        let config = IngestConfig {
            timestamp_column: Some("date".into()),
            ..IngestConfig::default()
        };
        let ok = Normalizer::new(config.clone()).normalize(&[&source]);
        assert!(ok.is_ok());

        let empty = CsvSource::from_text("e.csv", "date,revenue\nnope,1\n");
        let err = Normalizer::new(config).normalize(&[&empty]).unwrap_err();
        assert!(matches!(err, IngestError::EmptyDataset { .. }));
    }

    #[test]
    fn test_normalize_without_timestamp_fails() {
        let source = CsvSource::from_text("s.csv", "store,revenue\na,1\nb,2\n");
        let err = Normalizer::default().normalize(&[&source]).unwrap_err();
        assert_eq!(
            err,
            IngestError::MissingTimestamp {
                source_name: "s.csv".into()
            }
        );
    }

    #[test]
    fn test_normalize_mixed_backends() {
        let csv = CsvSource::from_text("sales.csv", "date;revenue\n2024-01-01;10\n2024-01-02;12\n");
        let json = JsonSource::from_text(
            "ads.json",
            r#"[{"date": "2024-01-02", "clicks": 40}, {"date": "2024-01-03", "clicks": 44}]"#,
        );
        let dataset = Normalizer::default().normalize(&[&csv, &json]).unwrap();
        assert_eq!(dataset.schema.metrics, vec!["revenue", "clicks"]);
        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.rows[0].status, RowStatus::Incomplete);
        assert_eq!(dataset.rows[1].metric("clicks"), Some(40.0));
        assert_eq!(dataset.rows[2].metric_value("revenue"), MetricValue::Missing);
        assert_eq!(dataset.rows[2].status, RowStatus::Incomplete);
        assert_eq!(dataset.summary.sources.len(), 2);
    }

    #[test]
    fn test_secondary_key_missing_from_one_source_is_plain_dimension() {
        let a = CsvSource::from_text("a.csv", "date,region,revenue\n2024-01-01,west,1\n");
        let b = CsvSource::from_text("b.csv", "date,clicks\n2024-01-01,5\n");
        let config = IngestConfig {
            secondary_keys: vec!["region".into()],
            ..IngestConfig::default()
        };
        let dataset = Normalizer::new(config).normalize(&[&a, &b]).unwrap();
        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset.rows[0].metric("clicks"), Some(5.0));
    }
}
