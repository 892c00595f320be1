//! dynunc: filter fitting and uncertainty propagation for dynamic measurements.
//!
//! This is the command-line front end over `lib-dsp`.

mod config;
mod data;
mod orchestrator;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use lib_dsp::montecarlo::DEFAULT_SEED;
use lib_dsp::ConvolutionMode;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "dynunc")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output format
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit an FIR or IIR filter to a measured frequency response
    Fit {
        /// Path to the fit job file (TOML or JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Output directory for filter.json, covariance.csv and the summary
        #[arg(short, long, default_value = "output")]
        output: PathBuf,
    },

    /// Apply a fitted filter to a signal with uncertainty
    Apply {
        /// Path to filter.json
        #[arg(long)]
        filter: PathBuf,

        /// Signal CSV with columns value[,std]
        #[arg(long)]
        signal: PathBuf,

        /// Output CSV path
        #[arg(short, long)]
        output: PathBuf,

        /// Common noise standard deviation, overriding the std column
        #[arg(long)]
        noise_std: Option<f64>,

        /// Output shift in samples (defaults to the filter delay; FIR only)
        #[arg(long)]
        shift: Option<usize>,

        /// Repeat the first sample before the signal start instead of zeros (FIR only)
        #[arg(long)]
        constant_start: bool,

        /// Propagate by Monte Carlo with this many runs (IIR filters default to 10000)
        #[arg(long)]
        mc_runs: Option<usize>,

        /// Seed for Monte Carlo draws
        #[arg(long, default_value_t = DEFAULT_SEED)]
        seed: u64,
    },

    /// Convolve two signals with uncertainty
    Convolve {
        /// First signal CSV with columns value[,std]
        #[arg(long)]
        first: PathBuf,

        /// Second signal CSV with columns value[,std]
        #[arg(long)]
        second: PathBuf,

        /// full, valid, same, nearest, reflect or mirror
        #[arg(short, long, default_value = "full", value_parser = parse_mode)]
        mode: ConvolutionMode,

        /// Output CSV path
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn parse_mode(s: &str) -> std::result::Result<ConvolutionMode, String> {
    s.parse().map_err(|e: lib_dsp::DspError| e.to_string())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match cli.command {
        Commands::Fit { config, output } => {
            run_fit(&config, &output, cli.format)?;
        }
        Commands::Apply {
            filter,
            signal,
            output,
            noise_std,
            shift,
            constant_start,
            mc_runs,
            seed,
        } => {
            let request = orchestrator::ApplyRequest {
                filter,
                signal,
                noise_std,
                shift,
                constant_start,
                mc_runs,
                seed,
            };
            run_apply(&request, &output, cli.format)?;
        }
        Commands::Convolve { first, second, mode, output } => {
            run_convolve(&first, &second, mode, &output, cli.format)?;
        }
    }

    Ok(())
}

fn run_fit(config_path: &Path, output_dir: &Path, format: OutputFormat) -> Result<()> {
    tracing::info!("Loading configuration from {:?}", config_path);

    let job = config::load_config(config_path)?;
    let outcome = orchestrator::Orchestrator::new(job).run()?;

    output::write_fit(&outcome, output_dir, format)?;

    tracing::info!("Fit complete. Results written to {:?}", output_dir);
    Ok(())
}

fn run_apply(request: &orchestrator::ApplyRequest, output_path: &Path, format: OutputFormat) -> Result<()> {
    let (_, result) = orchestrator::run_apply(request)?;
    let stds = result.uncertainty.standard_deviations(result.values.len());

    output::write_signal(output_path, &result.values, &stds)?;
    output::print_signal_summary("apply", &result.values, &stds, format)
}

fn run_convolve(
    first: &Path,
    second: &Path,
    mode: ConvolutionMode,
    output_path: &Path,
    format: OutputFormat,
) -> Result<()> {
    let result = orchestrator::run_convolve(first, second, mode)?;
    let stds: Vec<f64> = match &result.covariance {
        Some(cov) => cov.diag().iter().map(|v| v.max(0.0).sqrt()).collect(),
        None => vec![0.0; result.values.len()],
    };

    output::write_signal(output_path, &result.values, &stds)?;
    output::print_signal_summary(&format!("convolve ({})", mode), &result.values, &stds, format)
}
