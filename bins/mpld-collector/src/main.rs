use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::error;

use mpld_framing::FramingRegistry;
use mpld_server::{Collector, CollectorConfig};

/// Supervise a subcommand and serialize everything its process tree logs
/// (stdout/stderr lines, late-joining stream writers, and structured
/// datagrams) into one framed output stream.
#[derive(Parser, Debug)]
#[command(name = "mpld-collector")]
struct Args {
    /// Framing applied to each record (none, line, json, logfmt)
    #[arg(short = 'f', long, value_name = "NAME", default_value = "line")]
    framing: String,

    /// Forward signals to the child's process group instead of the child
    #[arg(long)]
    kill_pgroup: bool,

    /// Max bytes buffered per stream line; k/M/G suffixes, 0 = unlimited
    #[arg(
        short = 'l',
        long,
        value_name = "BYTES",
        default_value = "0",
        value_parser = parse_byte_size
    )]
    max_line_length: usize,

    /// Seconds to wait for late stream writers after the child exits
    #[arg(long, value_name = "SECS", default_value_t = 10.0)]
    shutdown_timeout: f64,

    /// Leave the child's stderr connected to the terminal
    #[arg(long)]
    no_capture_stderr: bool,

    /// The subcommand to supervise (after `--`)
    #[arg(last = true, required = true, value_name = "SUBCOMMAND")]
    command: Vec<String>,
}

fn main() {
    let args = parse_args();
    initialize_logging();

    match run(args) {
        Ok(status) => std::process::exit(exit_code_for(status)),
        Err(e) => {
            error!("collector failed: {e:#}");
            eprintln!("mpld-collector: {e:#}");
            std::process::exit(1);
        }
    }
}

fn run(args: Args) -> Result<ExitStatus> {
    let registry = FramingRegistry::with_builtins();
    let sink = registry.create(&args.framing, Box::new(std::io::stdout()))?;

    let mut config = CollectorConfig::new(args.command);
    config.kill_pgroup = args.kill_pgroup;
    config.max_line_length = args.max_line_length;
    config.capture_stderr = !args.no_capture_stderr;
    config.shutdown_timeout = Duration::try_from_secs_f64(args.shutdown_timeout)
        .map_err(|_| anyhow::anyhow!("invalid --shutdown-timeout"))?;

    // Single-threaded cooperative scheduling: every acceptor, connection
    // reader, and the subprocess waiter share one OS thread.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let status = runtime.block_on(Collector::new(config, sink).run())?;
    Ok(status)
}

/// Parses the CLI, printing usage to stderr. Help exits 0, errors exit 1.
fn parse_args() -> Args {
    match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            use clap::error::ErrorKind;
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            eprint!("{err}");
            std::process::exit(code);
        }
    }
}

fn initialize_logging() {
    // Diagnostics go to stderr; stdout belongs to the framed records.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("MPLD_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// The subcommand's exit code, with the usual 128+n projection for signal
/// deaths.
fn exit_code_for(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}

/// Parses a byte count with optional 1024-based k/M/G suffix.
fn parse_byte_size(s: &str) -> Result<usize, String> {
    let s = s.trim();
    let (digits, multiplier): (&str, usize) = match s.chars().last() {
        Some('k') | Some('K') => (&s[..s.len() - 1], 1024),
        Some('m') | Some('M') => (&s[..s.len() - 1], 1024 * 1024),
        Some('g') | Some('G') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1),
    };
    let value: usize = digits
        .trim()
        .parse()
        .map_err(|_| format!("invalid byte size: {s}"))?;
    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("byte size too large: {s}"))
}
