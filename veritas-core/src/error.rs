//! Error types for Veritas operations

use crate::ColumnKind;
use thiserror::Error;

/// Ingestion errors. Fatal for the report that raised them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IngestError {
    #[error(
        "Schema conflict on column '{column}': {left_source} declares {left:?}, {right_source} declares {right:?}"
    )]
    SchemaConflict {
        column: String,
        left_source: String,
        left: ColumnKind,
        right_source: String,
        right: ColumnKind,
    },

    #[error("Empty dataset: {reason}")]
    EmptyDataset { reason: String },

    #[error("No timestamp column found in source {source_name}")]
    MissingTimestamp { source_name: String },

    #[error("Source {source_name} unreadable: {reason}")]
    SourceUnreadable { source_name: String, reason: String },
}

/// Anomaly detection errors. Non-fatal: the report continues without flags.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AnomalyError {
    #[error("Insufficient data: {rows} complete rows, at least {required} required")]
    InsufficientData { rows: usize, required: usize },

    #[error("Anomaly model failed: {reason}")]
    ModelFailed { reason: String },
}

/// LLM provider errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("No LLM provider configured")]
    ProviderNotConfigured,

    #[error("Request to {provider} failed with status {status}: {message}")]
    RequestFailed {
        provider: String,
        status: i32,
        message: String,
    },

    #[error("Rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: i64,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Request to {provider} timed out after {after_ms}ms")]
    Timeout { provider: String, after_ms: u64 },

    #[error("Generation unavailable after {attempts} attempts: {last_error}")]
    GenerationUnavailable { attempts: u32, last_error: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Provider not supported: {provider}")]
    ProviderNotSupported { provider: String },

    #[error("Configuration file {path} unreadable: {reason}")]
    Unreadable { path: String, reason: String },
}

/// Pipeline orchestration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Report run cancelled")]
    Cancelled,

    #[error("Task for stage {stage} failed: {reason}")]
    TaskFailed { stage: String, reason: String },
}

/// Master error type for all Veritas errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VeritasError {
    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Anomaly error: {0}")]
    Anomaly(#[from] AnomalyError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

impl VeritasError {
    /// Whether the error aborts the report rather than degrading a section.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Ingest(_) | Self::Config(_) | Self::Pipeline(_)
        )
    }
}

/// Result type alias for Veritas operations.
pub type VeritasResult<T> = Result<T, VeritasError>;

// =============================================================================
// TESTS
// =============================================================================
