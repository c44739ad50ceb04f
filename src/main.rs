//! reload-proxy
//!
//! Runs the proxy controller and reads lifecycle events as newline-delimited
//! JSON on stdin:
//!
//! ```text
//! {"type":"reloadStart","config":{"name":"My-Worker"},"bundle":{...}}
//! {"type":"reloadComplete","config":{"name":"My-Worker"},"bundle":{...},
//!  "proxyData":{"destinationURL":{"host":"127.0.0.1:8788"},"headers":{}}}
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::io::BufReader;

use reload_proxy::config::{load_config, ProxyConfig};
use reload_proxy::events::intake::EventIntake;
use reload_proxy::lifecycle::shutdown_signal;
use reload_proxy::observability::{logging, metrics};
use reload_proxy::ProxyController;

#[derive(Parser)]
#[command(name = "reload-proxy")]
#[command(about = "Buffers traffic and debugger sessions across worker reloads", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the forwarding entry point address
    #[arg(long)]
    listen: Option<String>,

    /// Override the inspector endpoint address
    #[arg(long)]
    inspector_listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.listener.bind_address = listen;
    }
    if let Some(listen) = args.inspector_listen {
        config.inspector.bind_address = listen;
    }

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "reload-proxy starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let controller = ProxyController::new(config);
    let addrs = controller.start().await?;
    tracing::info!(
        entry = %addrs.entry,
        inspector = ?addrs.inspector,
        "Listening for traffic"
    );

    let (intake, mut events) = EventIntake::new(BufReader::new(tokio::io::stdin()));
    let intake_task = tokio::spawn(intake.run());

    let signal = shutdown_signal();
    tokio::pin!(signal);
    let mut intake_open = true;

    loop {
        tokio::select! {
            event = events.recv(), if intake_open => match event {
                Some(event) => {
                    if let Err(e) = controller.dispatch(event) {
                        tracing::warn!(error = %e, "Failed to apply lifecycle event");
                    }
                }
                None => {
                    tracing::info!("Event stream closed; serving until interrupted");
                    intake_open = false;
                }
            },
            _ = &mut signal => break,
        }
    }

    intake_task.abort();
    controller.teardown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
