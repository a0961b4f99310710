//! Unicov Command Line Interface
//!
//! Aggregates coverage collected across the sub-projects of a
//! multi-component build into one published report.
//!
//! # Commands
//!
//! - `unicov run` - full pipeline: collect all projects, merge, render, publish
//! - `unicov collect` - collect one project into a normalized record
//! - `unicov merge` - merge record files into one tracefile
//! - `unicov publish` - atomically publish a rendered report directory

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use unicov_cli::collector;
use unicov_cli::config::{FailureMode, ProjectSpec, RunConfig};
use unicov_cli::pipeline;
use unicov_cli::publisher;

/// Unicov - unified multi-project coverage aggregation.
#[derive(Parser)]
#[command(name = "unicov")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full aggregation pipeline described by a config file
    Run {
        /// Path to the run configuration
        #[arg(short, long, default_value = "unicov.json")]
        config: PathBuf,

        /// Override the configured failure mode
        #[arg(long, value_enum)]
        failure_mode: Option<FailureMode>,

        /// Override the bound on concurrent project collections
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Summary output format (text or json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Collect coverage for a single project
    Collect {
        /// Project root directory
        root: PathBuf,

        /// Target toolchain triple
        #[arg(long)]
        toolchain: String,

        /// Raw coverage artifact, relative to the project root
        #[arg(long, default_value = "target/coverage/coverage.lcov")]
        artifact: PathBuf,

        /// Where to write the normalized record
        #[arg(short, long)]
        output: PathBuf,

        /// Collection timeout in seconds
        #[arg(long, default_value_t = 600)]
        timeout_secs: u64,

        /// Project name recorded in the output (defaults to the root's
        /// directory name)
        #[arg(long)]
        name: Option<String>,

        /// Instrumented test/build command to run (defaults to a cargo test
        /// cycle for the toolchain)
        #[arg(trailing_var_arg = true)]
        command: Vec<String>,
    },

    /// Merge normalized record files into one tracefile
    Merge {
        /// Record files to merge
        inputs: Vec<PathBuf>,

        /// Output path (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Publish a rendered report directory to a target, atomically
    Publish {
        /// Rendered report directory
        report: PathBuf,

        /// Publish target directory
        target: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            config,
            failure_mode,
            jobs,
            format,
        } => run_pipeline(&config, failure_mode, jobs, &format).await,
        Commands::Collect {
            root,
            toolchain,
            artifact,
            output,
            timeout_secs,
            name,
            command,
        } => {
            let name = name.unwrap_or_else(|| {
                root.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "project".to_string())
            });
            let spec = ProjectSpec {
                name,
                root,
                toolchain,
                artifact,
                command: (!command.is_empty()).then_some(command),
            };
            match collector::collect_project(&spec, Duration::from_secs(timeout_secs), &output)
                .await
            {
                Ok(collected) => {
                    println!(
                        "Collected {} files from {} to {}",
                        collected.record.files.len(),
                        collected.project,
                        collected.output.display(),
                    );
                    Ok(ExitCode::SUCCESS)
                }
                Err(failure) => {
                    eprintln!("Collection failed: {failure}");
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Commands::Merge { inputs, output } => merge_records(&inputs, output.as_deref()),
        Commands::Publish { report, target } => match publisher::publish(&report, &target) {
            Ok(()) => {
                println!("Published to {}", target.display());
                Ok(ExitCode::SUCCESS)
            }
            Err(err) => {
                eprintln!("Publish failed: {err}");
                Ok(ExitCode::FAILURE)
            }
        },
    }
}

async fn run_pipeline(
    config_path: &std::path::Path,
    failure_mode: Option<FailureMode>,
    jobs: Option<usize>,
    format: &str,
) -> anyhow::Result<ExitCode> {
    let mut config = RunConfig::load(config_path)?;
    if let Some(mode) = failure_mode {
        config.failure_mode = mode;
    }
    if jobs.is_some() {
        config.jobs = jobs;
    }

    let summary = pipeline::run_with_shutdown(&config, pipeline::shutdown_signal()).await?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&summary)?),
        "text" => print!("{}", summary.render_text()),
        other => anyhow::bail!("unsupported summary format: {other}"),
    }

    Ok(if summary.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn merge_records(
    inputs: &[PathBuf],
    output: Option<&std::path::Path>,
) -> anyhow::Result<ExitCode> {
    use coverage_engine::{lcov, merge::merge};

    let mut records = Vec::with_capacity(inputs.len());
    for input in inputs {
        let raw = std::fs::read_to_string(input)
            .with_context(|| format!("failed to read {}", input.display()))?;
        let mut record = lcov::parse(&raw)
            .with_context(|| format!("failed to parse {}", input.display()))?;
        record.project = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        records.push(record);
    }

    let (model, diagnostics) = merge(records);
    for conflict in &diagnostics.conflicts {
        eprintln!("merge conflict: {conflict}");
    }

    let written = lcov::write_model(&model);
    match output {
        Some(path) => collector::write_atomic(path, &written)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => print!("{written}"),
    }
    Ok(ExitCode::SUCCESS)
}
