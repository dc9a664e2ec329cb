//! Current and prior comparison windows.

use veritas_core::{PeriodBounds, PeriodSpec, Row, Timestamp};

/// Complete rows split into the current window and the window before it.
#[derive(Debug, Clone)]
pub struct Windows<'a> {
    pub current: Vec<&'a Row>,
    /// `None` when the data does not cover a full prior window
    pub prior: Option<Vec<&'a Row>>,
    current_range: Option<(Timestamp, Timestamp)>,
    prior_range: Option<(Timestamp, Timestamp)>,
}

impl Windows<'_> {
    pub fn current_bounds(&self) -> Option<PeriodBounds> {
        bounds(self.current_range, &self.current)
    }

    pub fn prior_bounds(&self) -> Option<PeriodBounds> {
        self.prior
            .as_ref()
            .and_then(|rows| bounds(self.prior_range, rows))
    }
}

fn bounds(
    range: Option<(Timestamp, Timestamp)>,
    rows: &[&Row],
) -> Option<PeriodBounds> {
    let (start, end) = match range {
        Some(range) => range,
        None => (rows.first()?.timestamp, rows.last()?.timestamp),
    };
    Some(PeriodBounds {
        start,
        end,
        rows: rows.len(),
    })
}

/// Split time-ordered complete rows according to the period.
///
/// `LastRows(n)` takes the last `n` rows and the `n` before them; the prior
/// window exists only if all `n` are available. `DateRange` is half-open and
/// its prior window is the equal-length range ending at `start`; it exists
/// only if the data begins at or before the prior start.
pub fn resolve_windows<'a>(rows: &[&'a Row], period: &PeriodSpec) -> Windows<'a> {
    match period {
        PeriodSpec::LastRows(n) => {
            let n = (*n).max(1);
            let split = rows.len().saturating_sub(n);
            let current = rows[split..].to_vec();
            let prior = (split >= n).then(|| rows[split - n..split].to_vec());
            Windows {
                current,
                prior,
                current_range: None,
                prior_range: None,
            }
        }
        PeriodSpec::DateRange { start, end } => {
            let length = *end - *start;
            let prior_start = *start - length;
            let within = |from: Timestamp, to: Timestamp| -> Vec<&'a Row> {
                rows.iter()
                    .copied()
                    .filter(|row| row.timestamp >= from && row.timestamp < to)
                    .collect()
            };
            let current = within(*start, *end);
            let covered = rows.first().is_some_and(|row| row.timestamp <= prior_start);
            let prior = Some(within(prior_start, *start)).filter(|p| covered && !p.is_empty());
            Windows {
                current,
                prior,
                current_range: Some((*start, *end)),
                prior_range: Some((prior_start, *start)),
            }
        }
    }
}
