use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use detprobe::collect::send_and_collect;
use detprobe::config::Config;
use detprobe::detector::TcpDetector;
use detprobe::harness::{CyclePlan, run_cycles, timestamp};
use detprobe::poll::StatePoller;

#[derive(Debug, Parser)]
#[command(
    name = "detprobe",
    about = "Timing diagnostics for asynchronously-completing detector control servers",
    version = env!("CARGO_PKG_VERSION"),
    propagate_version = true
)]
struct Cli {
    /// Timing defaults file (TOML). Per-command flags override its values.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable debug-level logging when RUST_LOG is unset.
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Print machine-readable JSON summaries instead of human-readable lines.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Loop acquisitions to natural completion and time each cycle.
    Acquire {
        /// Control server address (`host:port`).
        addr: String,
        /// Exposure time in seconds.
        #[arg(long, default_value_t = 1.0)]
        exposure: f64,
        /// Settling sleep between cycles, in seconds.
        #[arg(long, default_value_t = 1.0)]
        dead_time: f64,
        /// Number of cycles to run.
        #[arg(long, default_value_t = 1)]
        cycles: u32,
        /// Delay between status polls, in milliseconds.
        #[arg(long, value_name = "MS")]
        poll_interval_ms: Option<u64>,
        /// Give up waiting for idle after this long, in milliseconds.
        #[arg(long, value_name = "MS")]
        max_wait_ms: Option<u64>,
    },
    /// Loop acquisitions that are cut short by an explicit stop.
    Abort {
        /// Control server address (`host:port`).
        addr: String,
        /// Exposure time in seconds (longer than the stop delay, so the
        /// stop lands mid-acquisition).
        #[arg(long, default_value_t = 5.0)]
        exposure: f64,
        /// Detector latency time in seconds; also slept after each stop.
        #[arg(long, default_value_t = 0.0)]
        latency: f64,
        /// Delay before the forced stop, in milliseconds.
        #[arg(long, value_name = "MS", default_value_t = 2000)]
        stop_after_ms: u64,
        /// Number of cycles to run.
        #[arg(long, default_value_t = 1)]
        cycles: u32,
    },
    /// Send one payload and collect the unframed reply by idle gap.
    Send {
        /// Server address (`host:port`).
        addr: String,
        /// Payload to send; a newline is appended.
        message: String,
        /// Quiet period that ends a reply, in milliseconds.
        #[arg(long, value_name = "MS")]
        idle_gap_ms: Option<u64>,
        /// Re-check pace while no reply has arrived, in milliseconds.
        #[arg(long, value_name = "MS")]
        empty_backoff_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = match cli.config.as_deref() {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Acquire {
            addr,
            exposure,
            dead_time,
            cycles,
            poll_interval_ms,
            max_wait_ms,
        } => {
            let poller = StatePoller::new(config.poll_settings(poll_interval_ms, max_wait_ms));
            let plan = CyclePlan {
                exposure: Duration::from_secs_f64(exposure),
                latency: Duration::from_secs_f64(dead_time),
                stop_after: None,
            };
            run_loop(&addr, &config, poller, plan, cycles, cli.json).await
        }
        Commands::Abort {
            addr,
            exposure,
            latency,
            stop_after_ms,
            cycles,
        } => {
            let poller = StatePoller::new(config.poll_settings(None, None));
            let plan = CyclePlan {
                exposure: Duration::from_secs_f64(exposure),
                latency: Duration::from_secs_f64(latency),
                stop_after: Some(Duration::from_millis(stop_after_ms)),
            };
            run_loop(&addr, &config, poller, plan, cycles, cli.json).await
        }
        Commands::Send {
            addr,
            message,
            idle_gap_ms,
            empty_backoff_ms,
        } => {
            let settings = config.collect_settings(idle_gap_ms, empty_backoff_ms);
            let mut stream = timeout(config.connect_timeout(), TcpStream::connect(&addr))
                .await
                .with_context(|| format!("connect to {addr} timed out"))?
                .with_context(|| format!("failed to connect to {addr}"))?;

            if !cli.json {
                println!("[{}] >> {message}", timestamp());
            }
            let payload = format!("{message}\n");
            let response = send_and_collect(&mut stream, payload.as_bytes(), &settings)
                .await
                .context("reply collection failed")?;

            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({
                        "reply": response.text(),
                        "fragments": response.fragments,
                        "elapsed_ms": response.elapsed.as_millis() as u64,
                    }))?
                );
            } else if response.is_empty() {
                println!(
                    "[{}] << (no reply within {} ms)",
                    timestamp(),
                    (settings.idle_gap * 2).as_millis()
                );
            } else {
                println!("[{}] << {}", timestamp(), response.text());
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_loop(
    addr: &str,
    config: &Config,
    poller: StatePoller,
    plan: CyclePlan,
    cycles: u32,
    json: bool,
) -> Result<ExitCode> {
    let mut detector = TcpDetector::connect_with_timeouts(
        addr,
        config.connect_timeout(),
        config.request_timeout(),
    )
    .await
    .with_context(|| format!("failed to connect to control server at {addr}"))?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let summary = run_cycles(&mut detector, &poller, plan, cycles, &cancel).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "{} cycles, {} ended not idle, {} ms total",
            summary.cycles, summary.faults, summary.elapsed_ms
        );
    }
    Ok(if summary.all_idle() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
