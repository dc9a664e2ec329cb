//! Table sources: the backend-agnostic capability the normalizer reads from.
//!
//! A source only produces raw string cells. Typing, timestamp detection and
//! merging happen in the normalizer so every backend is treated the same.

use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use veritas_core::{content_fingerprint, IngestError};

/// Delimiters tried when sniffing delimited text, in preference order.
pub const CANDIDATE_DELIMITERS: [u8; 3] = [b',', b';', b'\t'];

// ============================================================================
// RAW TABLE
// ============================================================================

/// Untyped rows as read from one source.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    /// Source name used for provenance and error messages
    pub source_name: String,
    /// Hex SHA-256 of the raw source bytes
    pub fingerprint: String,
    pub columns: Vec<String>,
    /// One entry per column; `None` is a structural null
    pub records: Vec<Vec<Option<String>>>,
    /// Lines skipped because their field count did not match the header
    pub malformed_lines: usize,
}

impl RawTable {
    pub fn new(
        source_name: impl Into<String>,
        fingerprint: impl Into<String>,
        columns: Vec<String>,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            fingerprint: fingerprint.into(),
            columns,
            records: Vec::new(),
            malformed_lines: 0,
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Non-null cells of one column, in record order.
    pub fn column_values(&self, index: usize) -> impl Iterator<Item = &str> {
        self.records
            .iter()
            .filter_map(move |record| record.get(index).and_then(|v| v.as_deref()))
    }

    /// Remove exact duplicate records, keeping the first. Returns how many were removed.
    pub fn dedup(&mut self) -> usize {
        let before = self.records.len();
        let mut seen = HashSet::new();
        self.records.retain(|record| seen.insert(record.clone()));
        before - self.records.len()
    }
}

// ============================================================================
// TABLE SOURCE TRAIT
// ============================================================================

/// Capability interface over heterogeneous tabular backends.
pub trait TableSource: Send + Sync {
    /// Name used for provenance (file name or caller-supplied label).
    fn name(&self) -> &str;

    /// Read the source into untyped rows.
    fn fetch_rows(&self) -> Result<RawTable, IngestError>;
}

fn unreadable(source_name: &str, reason: impl ToString) -> IngestError {
    IngestError::SourceUnreadable {
        source_name: source_name.to_string(),
        reason: reason.to_string(),
    }
}

fn read_file(name: &str, path: &Path) -> Result<Vec<u8>, IngestError> {
    std::fs::read(path).map_err(|e| unreadable(name, format!("{}: {}", path.display(), e)))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[derive(Debug, Clone)]
enum Input {
    Path(PathBuf),
    Text(String),
}

impl Input {
    fn bytes(&self, name: &str) -> Result<Vec<u8>, IngestError> {
        match self {
            Self::Path(path) => read_file(name, path),
            Self::Text(text) => Ok(text.clone().into_bytes()),
        }
    }
}

// ============================================================================
// DELIMITED TEXT
// ============================================================================

/// Delimited text (CSV, semicolon-separated or TSV) from a file or memory.
#[derive(Debug, Clone)]
pub struct CsvSource {
    name: String,
    input: Input,
    delimiter: Option<u8>,
}

impl CsvSource {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: file_name(&path),
            input: Input::Path(path),
            delimiter: None,
        }
    }

    pub fn from_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input: Input::Text(text.into()),
            delimiter: None,
        }
    }

    /// Skip sniffing and use a fixed delimiter.
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = Some(delimiter);
        self
    }
}

impl TableSource for CsvSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch_rows(&self) -> Result<RawTable, IngestError> {
        let bytes = self.input.bytes(&self.name)?;
        let fingerprint = content_fingerprint(&bytes);
        let delimiter = match self.delimiter {
            Some(d) => d,
            None => sniff_delimiter(&bytes),
        };
        parse_delimited(&self.name, fingerprint, &bytes, delimiter)
    }
}

/// Pick the delimiter whose parse gives a multi-column header with the most
/// records of matching width. Falls back to `,`.
pub fn sniff_delimiter(bytes: &[u8]) -> u8 {
    let mut best = (b',', 0usize, 0usize);
    for &delimiter in &CANDIDATE_DELIMITERS {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_reader(bytes);
        let width = match reader.headers() {
            Ok(headers) => headers.len(),
            Err(_) => continue,
        };
        if width < 2 {
            continue;
        }
        let consistent = reader
            .records()
            .filter_map(Result::ok)
            .filter(|r| r.len() == width)
            .count();
        if (consistent, width) > (best.1, best.2) {
            best = (delimiter, consistent, width);
        }
    }
    best.0
}

fn parse_delimited(
    name: &str,
    fingerprint: String,
    bytes: &[u8],
    delimiter: u8,
) -> Result<RawTable, IngestError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let columns: Vec<String> = reader
        .headers()
        .map_err(|e| unreadable(name, e))?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();
    if columns.is_empty() || columns.iter().all(String::is_empty) {
        return Err(unreadable(name, "missing header row"));
    }

    let mut table = RawTable::new(name, fingerprint, columns);
    for result in reader.records() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                tracing::debug!(source = name, error = %e, "skipping unparseable line");
                table.malformed_lines += 1;
                continue;
            }
        };
        if record.len() != table.columns.len() {
            table.malformed_lines += 1;
            continue;
        }
        table
            .records
            .push(record.iter().map(|cell| Some(cell.to_string())).collect());
    }
    Ok(table)
}

// ============================================================================
// STRUCTURED DOCUMENTS
// ============================================================================

/// JSON document: an array of objects, or an object holding one such array.
#[derive(Debug, Clone)]
pub struct JsonSource {
    name: String,
    input: Input,
}

impl JsonSource {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: file_name(&path),
            input: Input::Path(path),
        }
    }

    pub fn from_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input: Input::Text(text.into()),
        }
    }
}

impl TableSource for JsonSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch_rows(&self) -> Result<RawTable, IngestError> {
        let bytes = self.input.bytes(&self.name)?;
        let fingerprint = content_fingerprint(&bytes);
        let document: Value =
            serde_json::from_slice(&bytes).map_err(|e| unreadable(&self.name, e))?;
        let objects = record_array(&document)
            .ok_or_else(|| unreadable(&self.name, "expected an array of objects"))?;

        let flattened: Vec<Map<String, Value>> = objects.iter().map(|object| flatten_object(object)).collect();

        let mut columns: Vec<String> = Vec::new();
        for object in &flattened {
            for key in object.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }

        let mut table = RawTable::new(&self.name, fingerprint, columns);
        for object in &flattened {
            let record = table
                .columns
                .iter()
                .map(|column| object.get(column).and_then(cell_text))
                .collect();
            table.records.push(record);
        }
        Ok(table)
    }
}

/// Locate the array of row objects inside a document.
fn record_array(document: &Value) -> Option<Vec<&Map<String, Value>>> {
    fn objects_of(items: &[Value]) -> Option<Vec<&Map<String, Value>>> {
        items.iter().map(Value::as_object).collect()
    }
    match document {
        Value::Array(items) => objects_of(items),
        Value::Object(map) => map.values().find_map(|value| match value {
            Value::Array(items) if !items.is_empty() => objects_of(items),
            _ => None,
        }),
        _ => None,
    }
}

/// Flatten nested objects one level deep with `.`-joined keys.
///
/// `serde_json::Map` iterates keys in sorted order unless the
/// `preserve_order` feature is enabled.
fn flatten_object(object: &Map<String, Value>) -> Map<String, Value> {
    let mut flat = Map::new();
    for (key, value) in object {
        match value {
            Value::Object(inner) => {
                for (inner_key, inner_value) in inner {
                    flat.insert(format!("{key}.{inner_key}"), inner_value.clone());
                }
            }
            other => {
                flat.insert(key.clone(), other.clone());
            }
        }
    }
    flat
}

fn cell_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

// ============================================================================
// QUERY RESULTS
// ============================================================================

/// Rows already fetched from a queryable store.
#[derive(Debug, Clone)]
pub struct QueryResultSource {
    name: String,
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

impl QueryResultSource {
    pub fn new(
        name: impl Into<String>,
        columns: Vec<String>,
        rows: Vec<Vec<Option<String>>>,
    ) -> Self {
        Self {
            name: name.into(),
            columns,
            rows,
        }
    }
}

impl TableSource for QueryResultSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch_rows(&self) -> Result<RawTable, IngestError> {
        let serialized = serde_json::to_vec(&(&self.columns, &self.rows))
            .map_err(|e| unreadable(&self.name, e))?;
        let mut table = RawTable::new(
            &self.name,
            content_fingerprint(&serialized),
            self.columns.clone(),
        );
        for row in &self.rows {
            if row.len() != table.columns.len() {
                table.malformed_lines += 1;
                continue;
            }
            table.records.push(row.clone());
        }
        Ok(table)
    }
}
