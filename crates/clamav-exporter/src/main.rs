//! clamav-exporter - Prometheus exporter for ClamAV daemon statistics.
//!
//! Scrapes clamd over its control socket on every request to the telemetry
//! path and serves the result in the Prometheus text format.

mod handlers;
mod metrics;
mod state;

use std::net::SocketAddr;
use std::process;
use std::time::Duration;

use clap::Parser;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

use clamav_exporter_core::{ClamdCollector, DaemonAddress, ScrapeConfig};

use state::ExporterState;

// ============================================================
// CLI
// ============================================================

#[derive(Parser)]
#[command(
    name = "clamav-exporter",
    about = "Prometheus exporter for ClamAV daemon statistics",
    version = clamav_exporter_core::VERSION
)]
struct Args {
    /// clamd address: tcp://host[:port] or unix:///path/to/clamd.sock.
    #[arg(
        long = "clamav.address",
        default_value = "tcp://127.0.0.1:3310",
        env = "CLAMAV_EXPORTER_ADDRESS"
    )]
    address: String,

    /// Timeout of every socket operation towards clamd (e.g. "5s", "500ms").
    #[arg(long = "clamav.timeout", default_value = "5s", value_parser = humantime::parse_duration)]
    timeout: Duration,

    /// Extra attempts after a failed scrape. Negative values are rejected.
    #[arg(long = "clamav.retries", default_value = "0", allow_negative_numbers = true)]
    retries: i64,

    /// Address to serve metrics on.
    #[arg(
        long = "web.listen-address",
        default_value = "0.0.0.0:9906",
        env = "CLAMAV_EXPORTER_LISTEN"
    )]
    listen_address: String,

    /// Path under which to expose metrics.
    #[arg(long = "web.telemetry-path", default_value = "/metrics")]
    telemetry_path: String,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Initializes the tracing subscriber with the appropriate log level.
/// `RUST_LOG` directives are honoured on top of the level chosen by flags.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["clamav_exporter", "clamav_exporter_core"] {
        match format!("{}={}", target, level).parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("invalid log directive for {}: {}", target, e),
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Turns the flags into a collector config, or exits with status 1.
fn scrape_config(args: &Args) -> ScrapeConfig {
    let config = args
        .address
        .parse::<DaemonAddress>()
        .and_then(|address| ScrapeConfig::new(address, args.timeout, args.retries));
    match config {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            process::exit(1);
        }
    }
}

// ============================================================
// Main
// ============================================================

fn main() {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    let config = scrape_config(&args);

    if !args.telemetry_path.starts_with('/') {
        error!(path = %args.telemetry_path, "telemetry path must start with '/'");
        process::exit(1);
    }

    let addr: SocketAddr = match args.listen_address.parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(address = %args.listen_address, error = %e, "invalid listen address");
            process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to build tokio runtime");
            process::exit(1);
        }
    };

    let state = ExporterState {
        collector: ClamdCollector::new(config),
        telemetry_path: args.telemetry_path,
    };

    if let Err(e) = runtime.block_on(serve(addr, state)) {
        error!(error = %e, "server error");
        process::exit(1);
    }
}

async fn serve(addr: SocketAddr, state: ExporterState) -> std::io::Result<()> {
    let config = state.collector.config();
    info!(
        version = clamav_exporter_core::VERSION,
        address = %config.address(),
        timeout = ?config.timeout(),
        retries = config.retries(),
        "starting clamav-exporter"
    );

    let telemetry_path = state.telemetry_path.clone();
    let app = handlers::router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, path = %telemetry_path, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("clamav-exporter stopped");
    Ok(())
}

/// Resolves on SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
