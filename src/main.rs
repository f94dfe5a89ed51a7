//! packet-loss entry point.
//!
//! Reads a tab-separated packet trace, reconciles sequence gaps per
//! connection and prints the loss report. Settings come from an optional YAML
//! config file; command line flags take precedence.

use clap::Parser;
use std::fmt::Display;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use packet_loss::{
    analyze_packed, analyze_tuples,
    config::Config,
    error::{Error, Result},
    KeyMode, LossReport, Thresholds,
};

const DEFAULT_TRACE: &str = "trace-small.txt";

/// packet-loss - count the bytes missing from a TCP packet trace.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Trace file to analyse.
    #[arg(value_name = "TRACE", default_value = DEFAULT_TRACE)]
    trace: PathBuf,

    /// Path to the configuration file.
    #[arg(short, long, value_name = "FILE", env = "PACKET_LOSS_CONFIG")]
    config: Option<PathBuf>,

    /// Log level.
    #[arg(long, value_name = "LEVEL", default_value = "")]
    log_level: String,

    /// Also write the report to this file.
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Key connections on packed 64-bit lab-network ids.
    #[arg(long)]
    packed_ids: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::builtin()?,
    };
    let log_level = if cli.log_level.is_empty() {
        config.log.level.clone()
    } else {
        cli.log_level.clone()
    };
    setup_logging(&log_level)?;
    cli_main(cli, config, &mut io::stdout().lock())
}

pub fn cli_main<W: Write>(cli: Cli, config: Config, out: &mut W) -> Result<()> {
    let thresholds = config.analysis.thresholds()?;
    let key_mode = if cli.packed_ids {
        KeyMode::Packed
    } else {
        config.analysis.key
    };

    info!(trace = %cli.trace.display(), ?key_mode, "starting analysis");
    let reader = open_trace(&cli.trace);

    match key_mode {
        KeyMode::Tuple => {
            let report = analyze_tuples(reader, &config.analysis)?;
            emit(&report, out, cli.output.as_deref(), thresholds)
        }
        KeyMode::Packed => {
            let report = analyze_packed(reader, &config.analysis)?;
            emit(&report, out, cli.output.as_deref(), thresholds)
        }
    }
}

/// An unreadable trace is reported and analysed as empty
fn open_trace(path: &Path) -> Box<dyn BufRead> {
    match File::open(path) {
        Ok(file) => Box::new(BufReader::new(file)),
        Err(e) => {
            error!("could not open trace {}: {e}", path.display());
            Box::new(io::empty())
        }
    }
}

fn emit<K, W>(
    report: &LossReport<K>,
    out: &mut W,
    output: Option<&Path>,
    thresholds: Thresholds,
) -> Result<()>
where
    K: Clone + Display,
    W: Write,
{
    report.write_to(out, thresholds)?;

    if let Some(path) = output {
        let mut file = File::create(path)?;
        report.write_to(&mut file, thresholds)?;
        info!(path = %path.display(), "report written");
    }

    Ok(())
}

/// Configures the logging subsystem based on the specified log level.
///
/// # Arguments
/// * `level` - String representation of the desired log level
fn setup_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(format!("packet_loss={level}"))
        .map_err(|_| Error::LogLevel(level.to_string()))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
    Ok(())
}
