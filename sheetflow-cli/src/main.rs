//! Sheetflow CLI - runs table pipelines described in a jobs file.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sheetflow::config::JobsFile;
use sheetflow::events::LoggingEventSink;
use sheetflow::observability::{init_tracing, LogFormat};
use sheetflow::pipeline::{RowGroupValidator, TablePipeline, DEFAULT_BATCH_SIZE, DEFAULT_HEADER_ROWS};
use sheetflow::table::{normalize_for_upload, parse_rows, rows_to_string};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "sheetflow", version, about = "Fetch, validate and append tables")]
struct Cli {
    /// Log line format.
    #[arg(long, global = true, env = "SHEETFLOW_LOG_FORMAT", default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run every job in a jobs file, one after another.
    Run {
        /// Path to the jobs file.
        #[arg(short, long, env = "SHEETFLOW_CONFIG")]
        config: PathBuf,
        /// Only run the job with this pipeline name.
        #[arg(long)]
        job: Option<String>,
    },
    /// Load a jobs file and build its collaborators without running anything.
    Validate {
        /// Path to the jobs file.
        #[arg(short, long, env = "SHEETFLOW_CONFIG")]
        config: PathBuf,
    },
    /// Check whether a row can be the next empty row of the sink.
    CheckRow {
        /// The 1-based row index.
        row: u64,
        /// Data rows per append.
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: u64,
        /// Header rows written on the first append.
        #[arg(long, default_value_t = DEFAULT_HEADER_ROWS)]
        header_rows: u64,
    },
    /// Normalize a CSV file for upload.
    Normalize {
        /// The CSV file to read.
        input: PathBuf,
        /// Where to write the result; stdout when omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // The CLI works without logging.
    let _ = init_tracing(cli.log_format);

    match execute_command(&cli.command).await {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {e:#}");
            process::exit(2);
        }
    }
}

/// Runs a command. `Ok(false)` means it completed but reported a failure.
async fn execute_command(command: &Commands) -> Result<bool> {
    match command {
        Commands::Run { config, job } => run_jobs(config, job.as_deref()).await,
        Commands::Validate { config } => {
            let jobs = load_jobs(config)?;
            for job in &jobs.jobs {
                TablePipeline::from_job(job)
                    .with_context(|| format!("Job '{}' is invalid", job.pipeline.name))?;
                println!("{}: ok", job.pipeline.name);
            }
            Ok(true)
        }
        Commands::CheckRow {
            row,
            batch_size,
            header_rows,
        } => {
            let validator = RowGroupValidator::new(*batch_size).with_header_rows(*header_rows);
            let valid = validator.is_in_expected_group(*row);
            println!("{}", if valid { "valid" } else { "invalid" });
            Ok(valid)
        }
        Commands::Normalize { input, output } => {
            let csv = normalize_file(input)?;
            match output {
                Some(path) => std::fs::write(path, csv)
                    .with_context(|| format!("Failed to write {}", path.display()))?,
                None => print!("{csv}"),
            }
            Ok(true)
        }
    }
}

fn load_jobs(path: &Path) -> Result<JobsFile> {
    JobsFile::from_path(path).with_context(|| format!("Failed to load jobs from {}", path.display()))
}

async fn run_jobs(config: &Path, only: Option<&str>) -> Result<bool> {
    let jobs = load_jobs(config)?;
    let selected: Vec<_> = jobs
        .jobs
        .iter()
        .filter(|job| only.map_or(true, |name| job.pipeline.name == name))
        .collect();
    if selected.is_empty() {
        bail!("No job named '{}' in {}", only.unwrap_or_default(), config.display());
    }

    let events = Arc::new(LoggingEventSink::default());
    let mut failed = 0usize;
    for job in &selected {
        let pipeline = TablePipeline::from_job(job)
            .with_context(|| format!("Job '{}' is invalid", job.pipeline.name))?
            .with_event_sink(events.clone());

        match pipeline.run().await {
            Ok(report) => {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            Err(e) => {
                failed += 1;
                error!(pipeline = %job.pipeline.name, error = %e, "Job failed");
                println!("{}", serde_json::to_string_pretty(&e.to_dict())?);
            }
        }
    }

    info!(jobs = selected.len(), failed, "All jobs finished");
    Ok(failed == 0)
}

fn normalize_file(input: &Path) -> Result<String> {
    let text = std::fs::read_to_string(input).with_context(|| format!("Failed to read {}", input.display()))?;
    let rows = parse_rows(&text).with_context(|| format!("{} is not valid CSV", input.display()))?;
    Ok(rows_to_string(&normalize_for_upload(&rows))?)
}
