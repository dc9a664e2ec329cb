//! `veritas` - produce a verified insight report from tabular files.

use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use veritas_core::{VeritasConfig, VeritasResult};
use veritas_ingest::{CsvSource, JsonSource};
use veritas_pipeline::{
    init_tracing, render_text, CancellationToken, ReportPipeline, SharedSource, TelemetryConfig,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Debug, Parser)]
#[command(name = "veritas", version, about = "Verified insight reports from tabular data")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "VERITAS_CONFIG")]
    config: Option<PathBuf>,

    /// Report output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// CSV or JSON files to merge into one dataset
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

/// `.json` files are read as JSON records, everything else as delimited text.
fn source_for(path: &Path) -> SharedSource {
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    if is_json {
        Arc::new(JsonSource::from_path(path))
    } else {
        Arc::new(CsvSource::from_path(path))
    }
}

async fn run(cli: Cli) -> VeritasResult<String> {
    let config = VeritasConfig::load(cli.config.as_deref())?;
    let pipeline = ReportPipeline::new(config)?;
    let sources: Vec<SharedSource> = cli.files.iter().map(|p| source_for(p)).collect();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling report");
            on_interrupt.cancel();
        }
    });

    let bundle = pipeline.run(&sources, &cancel).await?;
    Ok(match cli.format {
        OutputFormat::Text => render_text(&bundle),
        OutputFormat::Json => serde_json::to_string_pretty(&bundle).map_err(|e| {
            veritas_core::PipelineError::TaskFailed {
                stage: "render".to_string(),
                reason: e.to_string(),
            }
        })?,
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut telemetry = TelemetryConfig::default();
    telemetry.json |= cli.log_json;
    if let Err(e) = init_tracing(&telemetry) {
        eprintln!("veritas: {e}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(report) => {
            println!("{report}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, fatal = e.is_fatal(), "report failed");
            eprintln!("veritas: {e}");
            ExitCode::FAILURE
        }
    }
}
