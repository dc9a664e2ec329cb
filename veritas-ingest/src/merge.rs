//! Typing raw tables and joining them on the timestamp key.

use std::collections::{BTreeMap, HashMap, HashSet};
use veritas_core::{ColumnKind, IngestConfig, IngestError, MetricValue, Row, Schema, Timestamp};

use crate::infer::{detect_timestamp_column, infer_kind, is_null, parse_number, parse_timestamp};
use crate::source::RawTable;

/// One parsed record of a typed table.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedRow {
    pub timestamp: Timestamp,
    /// Secondary-key values, in key order
    pub keys: Vec<String>,
    /// Observed metric values only; unparseable cells are absent
    pub metrics: BTreeMap<String, f64>,
    pub dimensions: BTreeMap<String, String>,
}

/// A source after type inference.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedTable {
    pub source_name: String,
    pub timestamp_column: String,
    /// Non-timestamp columns with their inferred kind, in source order
    pub columns: Vec<(String, ColumnKind)>,
    pub rows: Vec<TypedRow>,
    /// Rows dropped for a null or unparseable timestamp
    pub dropped_rows: usize,
}

/// Infer column kinds and parse every record of a raw table.
pub fn type_table(
    raw: &RawTable,
    config: &IngestConfig,
    keys: &[String],
) -> Result<TypedTable, IngestError> {
    let missing_timestamp = || IngestError::MissingTimestamp {
        source_name: raw.source_name.clone(),
    };
    let ts_index = match &config.timestamp_column {
        Some(name) => raw.column_index(name).ok_or_else(missing_timestamp)?,
        None => detect_timestamp_column(raw, config.numeric_threshold)
            .ok_or_else(missing_timestamp)?,
    };

    let mut columns = Vec::new();
    for (index, name) in raw.columns.iter().enumerate() {
        if index == ts_index || name.is_empty() {
            continue;
        }
        let kind = if keys.contains(name) {
            Some(ColumnKind::Dimension)
        } else {
            infer_kind(raw, index, config.numeric_threshold)
        };
        match kind {
            Some(kind) => columns.push((index, name.clone(), kind)),
            None => tracing::debug!(source = %raw.source_name, column = %name, "ignoring all-null column"),
        }
    }

    let mut rows = Vec::with_capacity(raw.records.len());
    let mut dropped_rows = 0usize;
    for record in &raw.records {
        let cell = |index: usize| record.get(index).and_then(|v| v.as_deref());
        let Some(timestamp) = cell(ts_index).and_then(parse_timestamp) else {
            dropped_rows += 1;
            continue;
        };
        let mut row = TypedRow {
            timestamp,
            keys: Vec::with_capacity(keys.len()),
            metrics: BTreeMap::new(),
            dimensions: BTreeMap::new(),
        };
        for (index, name, kind) in &columns {
            let Some(value) = cell(*index) else { continue };
            match kind {
                ColumnKind::Numeric => {
                    if let Some(number) = parse_number(value) {
                        row.metrics.insert(name.clone(), number);
                    }
                }
                ColumnKind::Dimension => {
                    if !is_null(value) {
                        row.dimensions.insert(name.clone(), value.trim().to_string());
                    }
                }
            }
        }
        for key in keys {
            row.keys
                .push(row.dimensions.get(key).cloned().unwrap_or_default());
        }
        rows.push(row);
    }

    Ok(TypedTable {
        source_name: raw.source_name.clone(),
        timestamp_column: raw.columns[ts_index].clone(),
        columns: columns
            .into_iter()
            .map(|(_, name, kind)| (name, kind))
            .collect(),
        rows,
        dropped_rows,
    })
}

/// Build the shared schema, failing on incompatible column kinds.
///
/// Columns keep first-declaration order across sources.
pub fn unify_schema(tables: &[TypedTable]) -> Result<Schema, IngestError> {
    let timestamp_column = tables
        .first()
        .map(|t| t.timestamp_column.clone())
        .unwrap_or_default();
    let mut declared: HashMap<&str, (&str, ColumnKind)> = HashMap::new();
    let mut metrics = Vec::new();
    let mut dimensions = Vec::new();

    for table in tables {
        for (name, kind) in &table.columns {
            match declared.get(name.as_str()) {
                Some((left_source, left)) if left != kind => {
                    return Err(IngestError::SchemaConflict {
                        column: name.clone(),
                        left_source: left_source.to_string(),
                        left: *left,
                        right_source: table.source_name.clone(),
                        right: *kind,
                    });
                }
                Some(_) => {}
                None => {
                    declared.insert(name.as_str(), (table.source_name.as_str(), *kind));
                    match kind {
                        ColumnKind::Numeric => metrics.push(name.clone()),
                        ColumnKind::Dimension => dimensions.push(name.clone()),
                    }
                }
            }
        }
    }

    Ok(Schema::new(timestamp_column)
        .with_metrics(metrics)
        .with_dimensions(dimensions))
}

/// Metric columns each source declares.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnCoverage {
    by_source: HashMap<String, HashSet<String>>,
}

impl ColumnCoverage {
    pub fn of(tables: &[TypedTable]) -> Self {
        let mut by_source: HashMap<String, HashSet<String>> = HashMap::new();
        for table in tables {
            by_source.entry(table.source_name.clone()).or_default().extend(
                table
                    .columns
                    .iter()
                    .filter(|(_, kind)| *kind == ColumnKind::Numeric)
                    .map(|(name, _)| name.clone()),
            );
        }
        Self { by_source }
    }

    /// Whether a source that contributed to `row` has a `metric` column.
    ///
    /// A metric none of them declares is a gap left by the join. Rows from
    /// sources this coverage does not know are treated as covering everything.
    pub fn covers(&self, row: &Row, metric: &str) -> bool {
        let mut known = row
            .sources
            .iter()
            .filter_map(|source| self.by_source.get(source))
            .peekable();
        if known.peek().is_none() {
            return true;
        }
        known.any(|columns| columns.contains(metric))
    }
}

type JoinKey = (Timestamp, Vec<String>, usize);

/// Outer-join typed tables on (timestamp, secondary keys).
///
/// The n-th occurrence of a key in one source joins the n-th occurrence in
/// another. For a column present in several sources the first source with a
/// value wins. Metrics no source supplied are `Missing`. The result is
/// stably sorted by timestamp.
pub fn outer_join(tables: &[TypedTable], schema: &Schema) -> Vec<Row> {
    let mut rows: Vec<Row> = Vec::new();
    let mut index: HashMap<JoinKey, usize> = HashMap::new();

    for table in tables {
        let mut occurrences: HashMap<(Timestamp, Vec<String>), usize> = HashMap::new();
        for typed in &table.rows {
            let seen = occurrences
                .entry((typed.timestamp, typed.keys.clone()))
                .or_insert(0);
            let key = (typed.timestamp, typed.keys.clone(), *seen);
            *seen += 1;

            let slot = *index.entry(key).or_insert_with(|| {
                rows.push(Row::new(typed.timestamp));
                rows.len() - 1
            });
            let row = &mut rows[slot];
            for (name, value) in &typed.metrics {
                row.metrics
                    .entry(name.clone())
                    .or_insert(MetricValue::Observed(*value));
            }
            for (name, value) in &typed.dimensions {
                row.dimensions
                    .entry(name.clone())
                    .or_insert_with(|| value.clone());
            }
            if !row.sources.contains(&table.source_name) {
                row.sources.push(table.source_name.clone());
            }
        }
    }

    for row in &mut rows {
        for metric in &schema.metrics {
            row.metrics
                .entry(metric.clone())
                .or_insert(MetricValue::Missing);
        }
    }
    rows.sort_by_key(|row| row.timestamp);
    rows
}
