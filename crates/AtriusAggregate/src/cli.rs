//! # Aggregate Query CLI
//!
//! Runs an aggregate request, given as a FHIR `Parameters` resource, over
//! resources loaded from disk and prints the grouped results.
//!
//! ## Command Line Options
//!
//! ```text
//! -r, --request <REQUEST>                Path to the request Parameters JSON (or use stdin if not provided)
//! -d, --data <DATA>                      Directory of <Type>.ndjson files, an NDJSON file or a Bundle JSON file
//!     --value-sets <VALUE_SETS>          ValueSet JSON (resource, array or Bundle) with expansions for memberOf
//!     --terminology-url <URL>            Terminology server base URL [env: ATRIUS_TERMINOLOGY_URL]
//! -f, --format <FORMAT>                  Output format (parameters, json, csv) [default: parameters]
//!     --explain                          Print the query plan instead of executing it
//!     --skip-invalid                     Skip invalid NDJSON lines and resources instead of failing
//!     --log-level <LOG_LEVEL>            Log level when RUST_LOG is not set [env: ATRIUS_LOG_LEVEL] [default: info]
//! -h, --help                             Print help
//!
//! * --terminology-url is available when compiled with the terminology-http feature
//! ```
//!
//! ## Usage Examples
//!
//! ### Count patients by gender
//! ```bash
//! atrius-aggregate --request gender.Parameters.json --data ./ndjson
//! ```
//!
//! ### Request from stdin, CSV output
//! ```bash
//! cat gender.Parameters.json | atrius-aggregate --data bundle.json --format csv
//! ```
//!
//! ### Using value sets for memberOf
//! ```bash
//! atrius-aggregate -r ed-diagnosis.Parameters.json -d ./ndjson --value-sets valuesets.json
//! ```
//!
//! ### Show the plan
//! ```bash
//! atrius-aggregate -r gender.Parameters.json -d ./ndjson --explain
//! ```
//!
//! On failure the CLI prints an OperationOutcome describing the error to
//! stdout and exits with a non-zero status.

use anyhow::{Context, Result};
use atrius_aggregate::{AggregateExecutor, AggregateRequest, EngineConfig, NdjsonReader, StaticTerminology};
use atrius_path_support::QueryError;
use clap::{Parser, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// FHIR Parameters resource
    Parameters,
    /// Plain JSON of the grouped results
    Json,
    /// CSV with a header row
    Csv,
}

#[derive(Parser, Debug)]
#[command(name = "atrius-aggregate")]
#[command(about = "Runs aggregate queries over FHIR resources")]
struct CliConfig {
    /// Path to the request Parameters JSON (or use stdin if not provided)
    #[arg(long, short = 'r')]
    request: Option<PathBuf>,

    /// Directory of <Type>.ndjson files, an NDJSON file or a Bundle JSON file
    #[arg(long, short = 'd')]
    data: PathBuf,

    /// ValueSet JSON (resource, array or Bundle) with expansions for memberOf
    #[arg(long)]
    value_sets: Option<PathBuf>,

    /// Terminology server base URL used to expand value sets
    #[cfg(feature = "terminology-http")]
    #[arg(long, env = "ATRIUS_TERMINOLOGY_URL")]
    terminology_url: Option<String>,

    /// Output format
    #[arg(long, short = 'f', value_enum, default_value_t = OutputFormat::Parameters)]
    format: OutputFormat,

    /// Print the query plan instead of executing it
    #[arg(long)]
    explain: bool,

    /// Skip invalid NDJSON lines and resources instead of failing
    #[arg(long)]
    skip_invalid: bool,

    /// Log level when RUST_LOG is not set
    #[arg(long, env = "ATRIUS_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

fn main() -> ExitCode {
    let config = CliConfig::parse();

    let filter = format!(
        "atrius_aggregate={0},atrius_path_compiler={0}",
        config.log_level
    );
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with_writer(io::stderr)
        .init();

    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let query_error = match error.downcast_ref::<QueryError>() {
                Some(query_error) => query_error.clone(),
                None => QueryError::Execution(format!("{:#}", error)),
            };
            let outcome = query_error.operation_outcome();
            match serde_json::to_string_pretty(&outcome) {
                Ok(text) => println!("{}", text),
                Err(_) => eprintln!("{}", query_error),
            }
            ExitCode::FAILURE
        }
    }
}

fn run(config: &CliConfig) -> Result<()> {
    let request_text = match &config.request {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("Cannot read request {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };
    let request = AggregateRequest::from_json(&request_text)?;

    let reader = NdjsonReader::new()
        .with_skip_invalid(config.skip_invalid)
        .load_path(&config.data)?;

    let mut engine_config = EngineConfig::r4()?;
    if let Some(path) = &config.value_sets {
        engine_config =
            engine_config.with_terminology_provider(Arc::new(StaticTerminology::from_file(path)?));
    }
    #[cfg(feature = "terminology-http")]
    if let Some(url) = &config.terminology_url {
        info!(url = %url, "Using terminology server");
        engine_config = engine_config
            .with_terminology_provider(Arc::new(atrius_aggregate::HttpTerminology::new(url)));
    }

    let executor = AggregateExecutor::new(engine_config, Arc::new(reader));
    if config.explain {
        println!("{}", executor.explain(&request)?);
        return Ok(());
    }

    let response = executor.execute(&request)?;
    info!(groupings = response.groupings.len(), "Writing response");
    match config.format {
        OutputFormat::Parameters => {
            println!("{}", serde_json::to_string_pretty(&response.to_parameters())?)
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&response)?),
        OutputFormat::Csv => response.write_csv(io::stdout().lock())?,
    }
    Ok(())
}
