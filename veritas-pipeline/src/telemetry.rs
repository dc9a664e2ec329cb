//! Tracing subscriber initialization
//!
//! Structured logs go to stderr so report output on stdout stays clean.
//! The filter comes from `VERITAS_LOG`, falling back to `RUST_LOG`, then to
//! `veritas=info,warn`.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use veritas_core::{ConfigError, VeritasResult};

const DEFAULT_FILTER: &str = "veritas=info,warn";

/// Logging configuration from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// `EnvFilter` directives
    pub filter: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl TelemetryConfig {
    /// Build from an explicit variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let filter = lookup("VERITAS_LOG")
            .or_else(|| lookup("RUST_LOG"))
            .filter(|f| !f.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_FILTER.to_string());
        let json = lookup("VERITAS_LOG_FORMAT")
            .map(|f| f.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        Self { filter, json }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

/// Install the global subscriber. Call once at startup.
///
/// # Errors
/// `ConfigError::InvalidValue` when the filter does not parse or a
/// subscriber is already installed.
pub fn init_tracing(config: &TelemetryConfig) -> VeritasResult<()> {
    let env_filter = EnvFilter::try_new(&config.filter).map_err(|e| ConfigError::InvalidValue {
        field: "VERITAS_LOG".to_string(),
        value: config.filter.clone(),
        reason: e.to_string(),
    })?;

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = if config.json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };
    installed.map_err(|e| ConfigError::InvalidValue {
        field: "tracing subscriber".to_string(),
        value: config.filter.clone(),
        reason: e.to_string(),
    })?;

    tracing::debug!(filter = %config.filter, json = config.json, "Tracing initialized");
    Ok(())
}
