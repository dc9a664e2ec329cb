//! Configuration types

use crate::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

// ============================================================================
// SECTIONS
// ============================================================================

/// Normalizer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Explicit timestamp column; detected when absent
    pub timestamp_column: Option<String>,
    /// Extra join keys beside the timestamp (e.g. region, store)
    pub secondary_keys: Vec<String>,
    /// Share of non-null values that must parse for a column to be numeric
    pub numeric_threshold: f64,
    /// Trailing window (observations) used to impute numeric gaps
    pub imputation_window: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            timestamp_column: None,
            secondary_keys: Vec::new(),
            numeric_threshold: 0.95,
            imputation_window: 7,
        }
    }
}

/// Comparison window for KPIs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodSpec {
    /// The last N complete rows, compared with the N rows before them
    LastRows(usize),
    /// Half-open range `[start, end)`, compared with the equal-length range before it
    DateRange { start: Timestamp, end: Timestamp },
}

/// KPI calculator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KpiConfig {
    pub period: PeriodSpec,
    /// Per-column aggregation that overrides the name-based policy
    pub aggregation_overrides: BTreeMap<String, Aggregation>,
    /// Points both columns need before a correlation is reported
    pub min_correlation_points: usize,
    /// Compute ctr, conversion_rate, cost_per_click, revenue_per_customer
    pub derived_metrics: bool,
}

impl Default for KpiConfig {
    fn default() -> Self {
        Self {
            period: PeriodSpec::LastRows(7),
            aggregation_overrides: BTreeMap::new(),
            min_correlation_points: 3,
            derived_metrics: true,
        }
    }
}

/// Isolation forest settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Expected share of anomalous rows
    pub contamination: f64,
    pub n_trees: usize,
    /// Subsample size per tree (psi)
    pub sample_size: usize,
    /// Complete rows required before fitting
    pub min_rows: usize,
    pub seed: u64,
    /// Robust z-score at which a metric counts as a driver
    pub driver_z_threshold: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            contamination: 0.05,
            n_trees: 100,
            sample_size: 256,
            min_rows: 10,
            seed: 42,
            driver_z_threshold: 3.0,
        }
    }
}

/// Guardrail settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Relative tolerance for a claim to count as verified
    pub tolerance: f64,
    /// Text that replaces a rejected sentence
    pub replacement_sentence: String,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.01,
            replacement_sentence: "Unknown.".to_string(),
        }
    }
}

/// Retry configuration for LLM operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts before declaring generation unavailable
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Backoff before attempt `attempt + 1` (0-based), capped at `max_backoff_ms`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = (self.backoff_multiplier as f64).powi(attempt as i32);
        let ms = (self.initial_backoff_ms as f64 * factor).min(self.max_backoff_ms as f64);
        Duration::from_millis(ms.max(0.0) as u64)
    }
}

/// LLM provider configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider_type: ProviderKind,
    pub endpoint: Option<String>,
    pub model: String,
}

impl ProviderConfig {
    pub fn new(provider_type: ProviderKind) -> Self {
        Self {
            provider_type,
            endpoint: None,
            model: provider_type.default_model().to_string(),
        }
    }
}

/// Narrative generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// No provider means every report falls back to context-only
    pub provider: Option<ProviderConfig>,
    /// Per-attempt deadline
    pub timeout_seconds: u64,
    pub retry: RetryConfig,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Concurrent in-flight requests per provider client
    pub max_concurrent_requests: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: None,
            timeout_seconds: 30,
            retry: RetryConfig::default(),
            max_tokens: 600,
            temperature: 0.2,
            max_concurrent_requests: 4,
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

// ============================================================================
// MASTER CONFIG
// ============================================================================

/// Master configuration struct. Shared read-only by every report run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VeritasConfig {
    pub ingest: IngestConfig,
    pub kpi: KpiConfig,
    pub anomaly: AnomalyConfig,
    pub guard: GuardConfig,
    pub llm: LlmConfig,
}

impl VeritasConfig {
    /// Build the default report configuration.
    pub fn default_report() -> Self {
        Self::default()
    }

    /// Parse a TOML document. Missing sections and fields take defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::InvalidValue {
            field: "<toml>".to_string(),
            value: String::new(),
            reason: e.to_string(),
        })
    }

    /// Read and parse a TOML file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Load from an optional file, apply environment overrides, validate.
    pub fn load(path: Option<&Path>) -> VeritasResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_path(path)?,
            None => Self::default_report(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `VERITAS_*` environment overrides.
    ///
    /// Environment variables:
    /// - `VERITAS_SEED`: anomaly model seed
    /// - `VERITAS_CONTAMINATION`: contamination fraction
    /// - `VERITAS_KPI_WINDOW`: KPI window length in rows
    /// - `VERITAS_TOLERANCE`: guardrail relative tolerance
    /// - `VERITAS_LLM_TIMEOUT_SECONDS`: per-attempt deadline
    /// - `VERITAS_LLM_MAX_RETRIES`: attempts before giving up
    /// - `VERITAS_LLM_PROVIDER`: anthropic | openai | ollama | mock
    /// - `VERITAS_LLM_MODEL`: model name for the configured provider
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("VERITAS_SEED") {
            self.anomaly.seed = parse_override("VERITAS_SEED", &v)?;
        }
        if let Some(v) = lookup("VERITAS_CONTAMINATION") {
            self.anomaly.contamination = parse_override("VERITAS_CONTAMINATION", &v)?;
        }
        if let Some(v) = lookup("VERITAS_KPI_WINDOW") {
            self.kpi.period = PeriodSpec::LastRows(parse_override("VERITAS_KPI_WINDOW", &v)?);
        }
        if let Some(v) = lookup("VERITAS_TOLERANCE") {
            self.guard.tolerance = parse_override("VERITAS_TOLERANCE", &v)?;
        }
        if let Some(v) = lookup("VERITAS_LLM_TIMEOUT_SECONDS") {
            self.llm.timeout_seconds = parse_override("VERITAS_LLM_TIMEOUT_SECONDS", &v)?;
        }
        if let Some(v) = lookup("VERITAS_LLM_MAX_RETRIES") {
            self.llm.retry.max_retries = parse_override("VERITAS_LLM_MAX_RETRIES", &v)?;
        }
        if let Some(v) = lookup("VERITAS_LLM_PROVIDER") {
            let kind = ProviderKind::from_name(&v)
                .map_err(|_| ConfigError::ProviderNotSupported { provider: v.clone() })?;
            match self.llm.provider.as_mut() {
                Some(provider) if provider.provider_type == kind => {}
                _ => self.llm.provider = Some(ProviderConfig::new(kind)),
            }
        }
        if let Some(v) = lookup("VERITAS_LLM_MODEL") {
            match self.llm.provider.as_mut() {
                Some(provider) => provider.model = v,
                None => {
                    return Err(ConfigError::MissingRequired {
                        field: "llm.provider".to_string(),
                    })
                }
            }
        }
        Ok(())
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - contamination in (0, 0.5]
    /// - tolerance in (0, 1)
    /// - numeric_threshold in (0, 1]
    /// - windows, tree counts and timeouts are positive
    /// - date ranges are non-empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.ingest.numeric_threshold > 0.0 && self.ingest.numeric_threshold <= 1.0) {
            return Err(invalid(
                "ingest.numeric_threshold",
                self.ingest.numeric_threshold,
                "must be in (0, 1]",
            ));
        }
        if self.ingest.imputation_window == 0 {
            return Err(invalid("ingest.imputation_window", 0, "must be > 0"));
        }

        match &self.kpi.period {
            PeriodSpec::LastRows(0) => {
                return Err(invalid("kpi.period.last_rows", 0, "must be > 0"));
            }
            PeriodSpec::DateRange { start, end } if end <= start => {
                return Err(invalid(
                    "kpi.period.date_range",
                    format!("{start}..{end}"),
                    "end must be after start",
                ));
            }
            _ => {}
        }
        if self.kpi.min_correlation_points < 2 {
            return Err(invalid(
                "kpi.min_correlation_points",
                self.kpi.min_correlation_points,
                "must be >= 2",
            ));
        }

        if !(self.anomaly.contamination > 0.0 && self.anomaly.contamination <= 0.5) {
            return Err(invalid(
                "anomaly.contamination",
                self.anomaly.contamination,
                "must be in (0, 0.5]",
            ));
        }
        if self.anomaly.n_trees == 0 {
            return Err(invalid("anomaly.n_trees", 0, "must be > 0"));
        }
        if self.anomaly.sample_size < 2 {
            return Err(invalid(
                "anomaly.sample_size",
                self.anomaly.sample_size,
                "must be >= 2",
            ));
        }
        if self.anomaly.min_rows < 2 {
            return Err(invalid("anomaly.min_rows", self.anomaly.min_rows, "must be >= 2"));
        }
        if self.anomaly.driver_z_threshold <= 0.0 {
            return Err(invalid(
                "anomaly.driver_z_threshold",
                self.anomaly.driver_z_threshold,
                "must be positive",
            ));
        }

        if !(self.guard.tolerance > 0.0 && self.guard.tolerance < 1.0) {
            return Err(invalid(
                "guard.tolerance",
                self.guard.tolerance,
                "must be in (0, 1)",
            ));
        }
        if self.guard.replacement_sentence.trim().is_empty() {
            return Err(invalid("guard.replacement_sentence", "", "must not be empty"));
        }

        if self.llm.timeout_seconds == 0 {
            return Err(invalid("llm.timeout_seconds", 0, "must be > 0"));
        }
        if self.llm.retry.max_retries == 0 {
            return Err(invalid("llm.retry.max_retries", 0, "must be > 0"));
        }
        if self.llm.retry.backoff_multiplier <= 0.0 {
            return Err(invalid(
                "llm.retry.backoff_multiplier",
                self.llm.retry.backoff_multiplier,
                "must be positive",
            ));
        }
        if self.llm.retry.max_backoff_ms < self.llm.retry.initial_backoff_ms {
            return Err(invalid(
                "llm.retry.max_backoff_ms",
                self.llm.retry.max_backoff_ms,
                "must be >= initial_backoff_ms",
            ));
        }
        if self.llm.max_tokens == 0 {
            return Err(invalid("llm.max_tokens", 0, "must be > 0"));
        }
        if self.llm.max_concurrent_requests == 0 {
            return Err(invalid("llm.max_concurrent_requests", 0, "must be > 0"));
        }
        if let Some(provider) = &self.llm.provider {
            if provider.model.trim().is_empty() {
                return Err(invalid("llm.provider.model", "", "must not be empty"));
            }
        }

        Ok(())
    }
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        field: key.to_string(),
        value: value.to_string(),
        reason: "could not be parsed".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_report_is_valid() {
        let config = VeritasConfig::default_report();
        assert!(config.validate().is_ok());
        assert_eq!(config.anomaly.contamination, 0.05);
        assert_eq!(config.guard.tolerance, 0.01);
        assert_eq!(config.kpi.period, PeriodSpec::LastRows(7));
        assert!(config.llm.provider.is_none());
    }

    #[test]
    fn test_partial_toml_takes_defaults() {
        let config = VeritasConfig::from_toml_str(
            r#"
            [anomaly]
            seed = 7

            [kpi]
            period = { last_rows = 14 }

            [llm.provider]
            provider_type = "ollama"
            model = "llama3.1"
            "#,
        )
        .unwrap();
        assert_eq!(config.anomaly.seed, 7);
        assert_eq!(config.anomaly.n_trees, 100);
        assert_eq!(config.kpi.period, PeriodSpec::LastRows(14));
        let provider = config.llm.provider.unwrap();
        assert_eq!(provider.provider_type, ProviderKind::Ollama);
        assert!(provider.endpoint.is_none());
    }

    #[test]
    fn test_malformed_toml_is_invalid_value() {
        let err = VeritasConfig::from_toml_str("[anomaly\nseed = ").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_contamination_out_of_range() {
        let mut config = VeritasConfig::default_report();
        config.anomaly.contamination = 0.9;
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref field, .. } if field == "anomaly.contamination"
        ));
    }

    #[test]
    fn test_tolerance_must_be_positive() {
        let mut config = VeritasConfig::default_report();
        config.guard.tolerance = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_window_rejected() {
        let mut config = VeritasConfig::default_report();
        config.kpi.period = PeriodSpec::LastRows(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides_applied() {
        let mut config = VeritasConfig::default_report();
        config
            .apply_overrides_from(lookup(&[
                ("VERITAS_SEED", "99"),
                ("VERITAS_CONTAMINATION", "0.1"),
                ("VERITAS_KPI_WINDOW", "5"),
                ("VERITAS_TOLERANCE", "0.02"),
                ("VERITAS_LLM_TIMEOUT_SECONDS", "5"),
                ("VERITAS_LLM_MAX_RETRIES", "2"),
                ("VERITAS_LLM_PROVIDER", "openai"),
                ("VERITAS_LLM_MODEL", "gpt-4o"),
            ]))
            .unwrap();
        assert_eq!(config.anomaly.seed, 99);
        assert_eq!(config.anomaly.contamination, 0.1);
        assert_eq!(config.kpi.period, PeriodSpec::LastRows(5));
        assert_eq!(config.guard.tolerance, 0.02);
        assert_eq!(config.llm.timeout_seconds, 5);
        assert_eq!(config.llm.retry.max_retries, 2);
        let provider = config.llm.provider.unwrap();
        assert_eq!(provider.provider_type, ProviderKind::OpenAi);
        assert_eq!(provider.model, "gpt-4o");
    }

    #[test]
    fn test_unparseable_override_names_variable() {
        let mut config = VeritasConfig::default_report();
        let err = config
            .apply_overrides_from(lookup(&[("VERITAS_SEED", "abc")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref field, .. } if field == "VERITAS_SEED"
        ));
    }

    #[test]
    fn test_unknown_provider_not_supported() {
        let mut config = VeritasConfig::default_report();
        let err = config
            .apply_overrides_from(lookup(&[("VERITAS_LLM_PROVIDER", "gemini")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::ProviderNotSupported {
                provider: "gemini".to_string()
            }
        );
    }

    #[test]
    fn test_model_without_provider_is_missing_required() {
        let mut config = VeritasConfig::default_report();
        let err = config
            .apply_overrides_from(lookup(&[("VERITAS_LLM_MODEL", "x")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { .. }));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let retry = RetryConfig::default();
        assert_eq!(retry.backoff_for(0), Duration::from_millis(500));
        assert_eq!(retry.backoff_for(1), Duration::from_millis(1000));
        assert_eq!(retry.backoff_for(10), Duration::from_millis(8000));
    }

    #[test]
    fn test_from_path_missing_file_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let err = VeritasConfig::from_path(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Unreadable { .. }));
    }

    #[test]
    fn test_from_path_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("veritas.toml");
        std::fs::write(&path, "[guard]\ntolerance = 0.05\n").unwrap();
        let config = VeritasConfig::from_path(&path).unwrap();
        assert_eq!(config.guard.tolerance, 0.05);
    }
}
