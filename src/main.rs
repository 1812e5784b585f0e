//! Binary entry point: parse flags, initialize logging, load configuration,
//! start the pipeline graph, and serve HTTP until interrupted.

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use echo_rs::config::Config;
use echo_rs::{build_app, server};

#[derive(Parser, Debug)]
#[command(name = "echo-rs", about = "Voice sidecar for an AI coding agent")]
struct Args {
    /// HTTP bind port (overrides ECHO_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("echo-rs starting");

    let mut config = Config::from_env();
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let state = build_app(&config);
    state.start().await;

    if let Err(e) = server::serve(state.clone(), config.server.port, shutdown_signal()).await {
        warn!("{e}");
    }

    state.stop().await;
    info!("echo-rs stopped");
    Ok(())
}
