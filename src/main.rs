mod aggregate;
mod archive;
mod engine;
mod expr;
mod metric;
mod reverse;
mod timestamp;

use clap::Parser;
use engine::{LiveScan, Run, ScanOptions};
use metric::Metric;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

/// Read a log file backward from its end and print aggregate metric
/// values over trailing time windows as Graphite plaintext lines:
/// `<prefix>.<name> <value> <epoch>`.
#[derive(Parser, Debug)]
#[command(name = "logfile-values", version, about)]
pub struct Cli {
    /// Live log file to scan
    #[arg(long, default_value = "/var/log/messages")]
    file: PathBuf,

    /// Metric spec `name:column[:function:period]`, e.g. `rps:2:mean:5min`;
    /// repeatable. The 2-field short form reports the newest line's value.
    #[arg(long, required = true, value_parser = Metric::parse)]
    metric: Vec<Metric>,

    /// Exact expected field count per line (0 = unchecked)
    #[arg(long, default_value_t = 0)]
    columns_num: usize,

    /// Field index holding the timestamp
    #[arg(long, default_value_t = 0)]
    timestamp_column: usize,

    /// strptime-style timestamp format
    #[arg(long, default_value = "%Y-%m-%dT%H:%M:%S%z")]
    timestamp_format: String,

    /// Fall back into the newest rotated archive (`<file>.1.gz`) when the
    /// live file does not cover every window
    #[arg(long)]
    arch: bool,

    /// Metric name prefix for output lines
    #[arg(long, default_value = "logfile_values")]
    prefix: String,

    /// Extra diagnostics (skipped lines, archive fallback decisions)
    #[arg(short, long)]
    debug: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Diagnostics go to stderr; stdout carries only Graphite lines.
    let default_filter = if cli.debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "scan failed");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> io::Result<()> {
    let options = ScanOptions {
        columns_num: cli.columns_num,
        timestamp_column: cli.timestamp_column,
        timestamp_format: cli.timestamp_format,
    };
    let now = chrono::Utc::now().timestamp();
    let mut scan = Run::new(cli.file, cli.metric, options, now);

    match scan.scan_live()? {
        // Not an error: the file has not been created yet, so there is
        // nothing to report and nothing to print.
        LiveScan::Missing => return Ok(()),
        LiveScan::Exhausted if cli.arch => scan.scan_archive()?,
        LiveScan::Exhausted | LiveScan::Satisfied => {}
    }

    let stdout = io::stdout();
    let mut out = io::BufWriter::new(stdout.lock());
    scan.write_graphite(&cli.prefix, &mut out)?;
    out.flush()
}
