//! Index of every checkable fact in an insight context.

use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use veritas_core::{ClaimKind, InsightContext, SectionStatus};

use crate::extract::NUMBER_IN_TEXT;

/// Whether a claimed value is within the relative tolerance of a context value.
pub fn within_tolerance(claimed: f64, actual: f64, tolerance: f64) -> bool {
    (claimed - actual).abs() <= tolerance * actual.abs()
}

/// Half a unit in the last place a number was written with, after any
/// `k`/`m`/`bn` scale.
pub fn rounding_unit(decimals: u32, scale: f64) -> f64 {
    0.5 * 10f64.powi(-(decimals.min(15) as i32)) * scale
}

/// Whether `claimed` is `actual` rounded to the precision it was written at.
pub fn within_rounding(claimed: f64, actual: f64, unit: f64) -> bool {
    (claimed - actual).abs() <= unit + f64::EPSILON * actual.abs().max(1.0)
}

/// Name fragments of metrics whose values are themselves percentages.
const RATE_HINTS: &[&str] = &["rate", "pct", "percent", "ctr", "share", "margin"];

pub fn is_rate_metric(metric: &str) -> bool {
    let lower = metric.to_ascii_lowercase();
    RATE_HINTS.iter().any(|hint| lower.contains(hint))
}

/// Role of a number in the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactKind {
    /// Current-period KPI value
    Value,
    /// Prior-period KPI value
    Baseline,
    /// Percentage change
    Change,
    /// Current minus prior
    Difference,
    /// Anomalous value of a driver metric
    DriverValue,
    Median,
    /// Driver ratio to the median, or KPI value to baseline
    Ratio,
    ZScore,
    /// Row counts, point counts, flagged counts
    Count,
    /// 1-based row position of a flagged anomaly
    Position,
    Score,
    Coefficient,
    /// Number quoted in a status message
    Quoted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fact {
    pub metric: Option<String>,
    pub kind: FactKind,
    pub value: f64,
}

/// A metric name as it was found in a sentence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricMention {
    pub start: usize,
    pub end: usize,
    pub metric: String,
}

/// Numbers, names, dates and words the narrative may refer to.
#[derive(Debug, Clone, Default)]
pub struct FactIndex {
    facts: Vec<Fact>,
    /// (lowercase alias, metric), longest alias first
    aliases: Vec<(String, String)>,
    tokens: HashSet<String>,
    dates: BTreeSet<NaiveDate>,
    flagged_dates: BTreeSet<NaiveDate>,
    flagged_positions: BTreeSet<usize>,
    range: Option<(NaiveDate, NaiveDate)>,
    row_count: usize,
    changes: BTreeMap<String, f64>,
    rates: HashSet<String>,
    locations: HashSet<String>,
}

impl FactIndex {
    pub fn from_context(context: &InsightContext) -> Self {
        let mut index = Self {
            row_count: context.dataset.row_count,
            ..Self::default()
        };

        for metric in context.metric_names() {
            index.add_aliases(metric);
        }
        index
            .aliases
            .sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.0.cmp(&b.0)));

        index.push(None, FactKind::Count, context.dataset.row_count as f64);
        index.push(None, FactKind::Count, context.dataset.complete_rows as f64);
        index.push(None, FactKind::Count, context.anomalies.len() as f64);
        index.push(None, FactKind::Count, context.kpis.len() as f64);
        for period in [context.current_period, context.prior_period].into_iter().flatten() {
            index.push(None, FactKind::Count, period.rows as f64);
            index.dates.insert(period.start.date_naive());
            index.dates.insert(period.end.date_naive());
        }
        if let (Some(start), Some(end)) = (context.dataset.start, context.dataset.end) {
            index.range = Some((start.date_naive(), end.date_naive()));
            index.dates.insert(start.date_naive());
            index.dates.insert(end.date_naive());
        }

        for kpi in &context.kpis {
            let metric = Some(kpi.metric.as_str());
            if is_rate_metric(&kpi.metric) {
                index.rates.insert(kpi.metric.clone());
            }
            index.push(metric, FactKind::Value, kpi.value);
            index.push(None, FactKind::Count, kpi.current_points as f64);
            index.push(None, FactKind::Count, kpi.prior_points as f64);
            if let Some(baseline) = kpi.baseline {
                index.push(metric, FactKind::Baseline, baseline);
                index.push(metric, FactKind::Difference, kpi.value - baseline);
                if baseline != 0.0 {
                    index.push(metric, FactKind::Ratio, kpi.value / baseline);
                }
            }
            if let Some(change) = kpi.change.value() {
                index.push(metric, FactKind::Change, change);
                index.changes.insert(kpi.metric.clone(), change);
            }
        }

        for correlation in &context.correlations {
            index.push(None, FactKind::Coefficient, correlation.coefficient);
            index.push(None, FactKind::Count, correlation.points as f64);
        }

        if let Some(threshold) = context.anomaly_threshold {
            index.push(None, FactKind::Score, threshold);
        }
        for anomaly in &context.anomalies {
            index.flagged_positions.insert(anomaly.position);
            index.flagged_dates.insert(anomaly.timestamp.date_naive());
            index.dates.insert(anomaly.timestamp.date_naive());
            index.push(None, FactKind::Position, anomaly.position as f64);
            index.push(None, FactKind::Score, anomaly.score);
            for driver in &anomaly.drivers {
                let metric = Some(driver.metric.as_str());
                index.push(metric, FactKind::DriverValue, driver.value);
                index.push(metric, FactKind::Median, driver.median);
                index.push(metric, FactKind::ZScore, driver.robust_z);
                if let Some(ratio) = driver.ratio {
                    index.push(metric, FactKind::Ratio, ratio);
                }
            }
            for value in anomaly.dimensions.values() {
                index.locations.insert(value.to_ascii_lowercase());
            }
        }

        if let SectionStatus::Degraded { reason } = &context.anomaly_status {
            for m in NUMBER_IN_TEXT.find_iter(reason) {
                if let Ok(value) = m.as_str().parse::<f64>() {
                    index.push(None, FactKind::Quoted, value);
                }
            }
        }

        for values in context.dataset.dimension_values.values() {
            for value in values {
                index.locations.insert(value.to_ascii_lowercase());
            }
        }

        let json = serde_json::to_string(context).unwrap_or_default();
        index.tokens = tokenize(&json);
        for (alias, _) in &index.aliases {
            index.tokens.extend(tokenize(alias));
        }
        index
    }

    fn push(&mut self, metric: Option<&str>, kind: FactKind, value: f64) {
        if value.is_finite() {
            self.facts.push(Fact {
                metric: metric.map(str::to_string),
                kind,
                value,
            });
        }
    }

    fn add_aliases(&mut self, metric: &str) {
        let lower = metric.to_ascii_lowercase();
        let spaced = lower.replace(['_', '-', '.'], " ");
        let mut forms = vec![lower.clone(), spaced.clone()];
        for form in [&lower, &spaced] {
            match form.strip_suffix('s') {
                Some(singular) if singular.len() > 2 => forms.push(singular.to_string()),
                _ => forms.push(format!("{form}s")),
            }
        }
        for form in forms {
            if !form.trim().is_empty() && !self.aliases.iter().any(|(a, _)| *a == form) {
                self.aliases.push((form, metric.to_string()));
            }
        }
    }

    // ------------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------------

    /// Non-overlapping metric mentions in an ASCII-lowercased sentence.
    pub fn metric_mentions(&self, lower: &str) -> Vec<MetricMention> {
        let mut taken = vec![false; lower.len()];
        let mut mentions = Vec::new();
        for (alias, metric) in &self.aliases {
            let mut from = 0;
            while let Some(pos) = lower[from..].find(alias.as_str()) {
                let start = from + pos;
                let end = start + alias.len();
                from = end;
                if is_word_boundary(lower, start, end) && !taken[start..end].iter().any(|t| *t) {
                    taken[start..end].iter_mut().for_each(|t| *t = true);
                    mentions.push(MetricMention {
                        start,
                        end,
                        metric: metric.clone(),
                    });
                }
            }
        }
        mentions.sort_by_key(|m| m.start);
        mentions
    }

    /// Values a claim of `kind` about `metric` may legitimately quote.
    ///
    /// Percentages match period-over-period changes, and the current value
    /// of metrics that are rates themselves.
    pub fn candidates(&self, metric: Option<&str>, kind: ClaimKind) -> Vec<f64> {
        let kinds: &[FactKind] = match kind {
            ClaimKind::Percent => &[FactKind::Change, FactKind::Value],
            ClaimKind::Multiplier => &[FactKind::Ratio],
            _ => &[
                FactKind::Value,
                FactKind::Baseline,
                FactKind::DriverValue,
                FactKind::Median,
                FactKind::Difference,
            ],
        };
        self.facts
            .iter()
            .filter(|f| kinds.contains(&f.kind))
            .filter(|f| metric.is_none() || f.metric.as_deref() == metric)
            .filter(|f| kind != ClaimKind::Percent || f.kind == FactKind::Change || self.is_rate(f))
            .map(|f| f.value)
            .collect()
    }

    fn is_rate(&self, fact: &Fact) -> bool {
        fact.metric.as_ref().is_some_and(|m| self.rates.contains(m))
    }

    /// Row, point and flagged counts, plus numbers quoted in status messages.
    pub fn counts(&self) -> impl Iterator<Item = f64> + '_ {
        self.facts
            .iter()
            .filter(|f| matches!(f.kind, FactKind::Count | FactKind::Quoted))
            .map(|f| f.value)
    }

    /// Numbers a sentence naming no metric may quote. Counts, positions and
    /// scores are only reachable through their own claim forms.
    pub fn unattributed(&self) -> impl Iterator<Item = f64> + '_ {
        self.facts
            .iter()
            .filter(|f| !matches!(f.kind, FactKind::Count | FactKind::Position | FactKind::Score))
            .map(|f| f.value)
    }

    /// The value a correction should quote for a drifted claim.
    pub fn preferred(&self, metric: &str, kind: ClaimKind, claimed: f64) -> Option<f64> {
        let pick = |kinds: &[FactKind]| {
            kinds.iter().find_map(|k| {
                self.facts
                    .iter()
                    .find(|f| f.kind == *k && f.metric.as_deref() == Some(metric))
                    .map(|f| f.value)
            })
        };
        match kind {
            ClaimKind::Percent if self.rates.contains(metric) => {
                pick(&[FactKind::Change, FactKind::Value])
            }
            ClaimKind::Percent => pick(&[FactKind::Change]),
            ClaimKind::Multiplier => self
                .facts
                .iter()
                .filter(|f| f.kind == FactKind::Ratio && f.metric.as_deref() == Some(metric))
                .map(|f| f.value)
                .reduce(|a, b| if a >= b { a } else { b }),
            _ => self
                .candidates(Some(metric), kind)
                .into_iter()
                .min_by(|a, b| relative_gap(claimed, *a).total_cmp(&relative_gap(claimed, *b))),
        }
    }

    pub fn change_of(&self, metric: &str) -> Option<f64> {
        self.changes.get(metric).copied()
    }

    /// Whether a word (or its singular) occurs anywhere in the context.
    pub fn is_grounded_word(&self, word: &str) -> bool {
        let word = word.to_ascii_lowercase();
        self.tokens.contains(&word) || self.tokens.contains(singular(&word))
    }

    /// Whether a place name matches a dimension value or context words.
    pub fn knows_location(&self, phrase: &str) -> bool {
        let lower = phrase.to_ascii_lowercase();
        self.locations.contains(&lower)
            || lower
                .split_whitespace()
                .all(|w| self.is_grounded_word(w.trim_matches(|c: char| !c.is_alphanumeric())))
    }

    pub fn is_flagged_position(&self, position: usize) -> bool {
        self.flagged_positions.contains(&position)
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn is_flagged_date(&self, date: NaiveDate) -> bool {
        self.flagged_dates.contains(&date)
    }

    pub fn is_known_date(&self, date: NaiveDate) -> bool {
        self.dates.contains(&date)
    }

    pub fn in_range(&self, date: NaiveDate) -> bool {
        self.range
            .is_some_and(|(start, end)| date >= start && date <= end)
    }

    pub fn year_in_range(&self, year: i32) -> bool {
        use chrono::Datelike;
        self.range
            .is_some_and(|(start, end)| year >= start.year() && year <= end.year())
    }
}

fn relative_gap(claimed: f64, actual: f64) -> f64 {
    (claimed - actual).abs() / actual.abs().max(f64::EPSILON)
}

/// Lowercase alphanumeric words of a text.
pub fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Naive singular form: strips one trailing `s` from longer words.
pub fn singular(word: &str) -> &str {
    match word.strip_suffix('s') {
        Some(stem) if stem.len() > 2 && !stem.ends_with('s') => stem,
        _ => word,
    }
}

/// Whether `[start, end)` is delimited by non-word characters.
pub fn is_word_boundary(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    let is_word = |c: Option<char>| c.is_some_and(|c| c.is_alphanumeric() || c == '_');
    !is_word(before) && !is_word(after)
}
