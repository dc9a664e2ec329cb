//! Cell parsing and column type inference.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use veritas_core::{ColumnKind, Timestamp};

use crate::source::RawTable;

/// Tokens read as null, compared case-insensitively after trimming.
const NULL_TOKENS: [&str; 7] = ["", "na", "n/a", "null", "none", "nan", "-"];

/// Column-name fragments that suggest a time key.
const TIME_NAME_HINTS: [&str; 7] = ["date", "time", "timestamp", "datetime", "day", "period", "ts"];

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y"];

pub fn is_null(cell: &str) -> bool {
    let cell = cell.trim();
    NULL_TOKENS.iter().any(|t| cell.eq_ignore_ascii_case(t))
}

/// Parse a numeric cell.
///
/// Accepts surrounding whitespace, a leading sign, a leading currency symbol,
/// thousands separators and a trailing `%`. A single comma followed by other
/// than three digits is read as a decimal comma.
pub fn parse_number(cell: &str) -> Option<f64> {
    let mut s = cell.trim();
    if is_null(s) {
        return None;
    }
    let negative = s.starts_with('-');
    if negative || s.starts_with('+') {
        s = &s[1..];
    }
    s = s.trim_start_matches(['$', '€', '£']).trim();
    s = s.strip_suffix('%').unwrap_or(s).trim_end();
    if s.is_empty() {
        return None;
    }

    let normalized = if s.contains(',') && !s.contains('.') {
        let groups: Vec<&str> = s.split(',').collect();
        let thousands = groups.len() > 1
            && !groups[0].is_empty()
            && groups[0].len() <= 3
            && groups[1..].iter().all(|g| g.len() == 3);
        if thousands {
            s.replace(',', "")
        } else if groups.len() == 2 {
            s.replace(',', ".")
        } else {
            return None;
        }
    } else {
        s.replace(',', "")
    };

    if !normalized
        .chars()
        .all(|c| c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E' || c == '-' || c == '+')
    {
        return None;
    }
    let value: f64 = normalized.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(if negative { -value } else { value })
}

/// Parse a timestamp cell into UTC. Dates without a time read as midnight.
pub fn parse_timestamp(cell: &str) -> Option<Timestamp> {
    let s = cell.trim();
    if is_null(s) {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        }
    }
    None
}

/// Share of non-null values accepted by `parse`, with the non-null count.
fn parse_share<T>(table: &RawTable, index: usize, parse: impl Fn(&str) -> Option<T>) -> (f64, usize) {
    let mut total = 0usize;
    let mut parsed = 0usize;
    for value in table.column_values(index).filter(|v| !is_null(v)) {
        total += 1;
        if parse(value).is_some() {
            parsed += 1;
        }
    }
    if total == 0 {
        (0.0, 0)
    } else {
        (parsed as f64 / total as f64, total)
    }
}

/// Infer a column's kind. `None` for columns with no non-null values.
pub fn infer_kind(table: &RawTable, index: usize, numeric_threshold: f64) -> Option<ColumnKind> {
    let (share, total) = parse_share(table, index, parse_number);
    if total == 0 {
        None
    } else if share >= numeric_threshold {
        Some(ColumnKind::Numeric)
    } else {
        Some(ColumnKind::Dimension)
    }
}

fn suggests_time(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.contains("date")
        || lower.contains("time")
        || lower
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|token| TIME_NAME_HINTS.contains(&token))
}

/// Locate the timestamp column.
///
/// Prefers a column whose name suggests time and whose values mostly parse;
/// falls back to the first column where at least `threshold` of the non-null
/// values parse as timestamps.
pub fn detect_timestamp_column(table: &RawTable, threshold: f64) -> Option<usize> {
    let parses = |index: usize, min_share: f64| {
        let (share, total) = parse_share(table, index, parse_timestamp);
        total > 0 && share >= min_share
    };
    let columns = 0..table.columns.len();
    columns
        .clone()
        .find(|&i| suggests_time(&table.columns[i]) && parses(i, 0.5))
        .or_else(|| columns.clone().find(|&i| parses(i, threshold)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn table(columns: &[&str], rows: &[&[&str]]) -> RawTable {
        let mut table = RawTable::new("t", "f", columns.iter().map(|c| c.to_string()).collect());
        table.records = rows
            .iter()
            .map(|r| r.iter().map(|c| Some(c.to_string())).collect())
            .collect();
        table
    }

    #[test]
    fn test_null_tokens() {
        for token in ["", " NA ", "n/a", "NULL", "None", "NaN", "-"] {
            assert!(is_null(token), "{token:?} should be null");
        }
        assert!(!is_null("0"));
    }

    #[test]
    fn test_parse_number_variants() {
        assert_eq!(parse_number("  42 "), Some(42.0));
        assert_eq!(parse_number("$1,234.50"), Some(1234.5));
        assert_eq!(parse_number("-€12"), Some(-12.0));
        assert_eq!(parse_number("12.5%"), Some(12.5));
        assert_eq!(parse_number("1,5"), Some(1.5));
        assert_eq!(parse_number("1,234,567"), Some(1_234_567.0));
        assert_eq!(parse_number("1e3"), Some(1000.0));
        assert_eq!(parse_number("west"), None);
        assert_eq!(parse_number("inf"), None);
        assert_eq!(parse_number("N/A"), None);
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let midnight = Utc.with_ymd_and_hms(2024, 3, 9, 0, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-03-09"), Some(midnight));
        assert_eq!(parse_timestamp("2024/03/09"), Some(midnight));
        assert_eq!(parse_timestamp("03/09/2024"), Some(midnight));
        assert_eq!(parse_timestamp("09.03.2024"), Some(midnight));
        assert_eq!(
            parse_timestamp("2024-03-09T10:30:00+02:00"),
            Some(Utc.with_ymd_and_hms(2024, 3, 9, 8, 30, 0).unwrap())
        );
        assert_eq!(
            parse_timestamp("2024-03-09 10:30:00"),
            Some(Utc.with_ymd_and_hms(2024, 3, 9, 10, 30, 0).unwrap())
        );
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(parse_timestamp("42"), None);
    }

    #[test]
    fn test_infer_kind_threshold() {
        let mut rows: Vec<Vec<String>> = (0..19).map(|i| vec![i.to_string()]).collect();
        rows.push(vec!["oops".to_string()]);
        let refs: Vec<Vec<&str>> = rows.iter().map(|r| r.iter().map(String::as_str).collect()).collect();
        let slices: Vec<&[&str]> = refs.iter().map(Vec::as_slice).collect();
        let t = table(&["value"], &slices);
        // 19 of 20 parse: exactly 95%
        assert_eq!(infer_kind(&t, 0, 0.95), Some(ColumnKind::Numeric));
        assert_eq!(infer_kind(&t, 0, 0.96), Some(ColumnKind::Dimension));
    }

    #[test]
    fn test_infer_kind_all_null_is_none() {
        let t = table(&["empty"], &[&["NA"], &[""]]);
        assert_eq!(infer_kind(&t, 0, 0.95), None);
    }

    #[test]
    fn test_detect_timestamp_prefers_named_column() {
        let t = table(
            &["created", "order_date", "revenue"],
            &[&["2024-01-01", "2024-02-01", "3"], &["2024-01-02", "2024-02-02", "4"]],
        );
        assert_eq!(detect_timestamp_column(&t, 0.95), Some(1));
    }

    #[test]
    fn test_detect_timestamp_falls_back_to_parseable_column() {
        let t = table(&["store", "when", "revenue"], &[&["a", "2024-01-01", "3"]]);
        assert_eq!(detect_timestamp_column(&t, 0.95), Some(1));
    }

    #[test]
    fn test_named_timestamp_tolerates_bad_cells() {
        let t = table(
            &["date", "revenue"],
            &[&["2024-01-01", "1"], &["bad", "2"], &["2024-01-03", "3"]],
        );
        assert_eq!(detect_timestamp_column(&t, 0.95), Some(0));
    }

    #[test]
    fn test_detect_timestamp_none() {
        let t = table(&["store", "revenue"], &[&["a", "3"]]);
        assert_eq!(detect_timestamp_column(&t, 0.95), None);
    }
}
