//! gslb-dns binary entry point.

use clap::Parser;
use gslb_dns::{telemetry, App, Config};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Ceiling on process teardown once a stop was requested.
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(600);

/// Authoritative DNS global server load balancer backed by Consul.
#[derive(Parser, Debug)]
#[command(name = "gslb-dns")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML).
    #[arg(short, long, default_value = "gslb-dns.yml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let config: Config = config::Config::builder()
        .add_source(config::File::from(args.config.clone()))
        .add_source(
            config::Environment::with_prefix("GSLB_DNS")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    // Initialize telemetry
    telemetry::init(&config.telemetry).map_err(|e| e as Box<dyn std::error::Error>)?;

    info!(
        config_file = %args.config.display(),
        listen = %config.dns_server.listen,
        dc = %config.dc_name,
        consul = %config.consul_config.addr,
        "Starting gslb-dns"
    );

    // Setup graceful shutdown
    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signals(cancel.clone()));

    let app = App::new(config)?;
    let mut app_handle = tokio::spawn(app.run(cancel.clone()));

    let result = tokio::select! {
        result = &mut app_handle => result,
        _ = cancel.cancelled() => {
            info!("Signal received, gracefully stopping servers...");
            match tokio::time::timeout(TEARDOWN_TIMEOUT, &mut app_handle).await {
                Ok(result) => result,
                Err(_) => {
                    error!("timeout waiting for graceful stop");
                    std::process::exit(1);
                }
            }
        }
    };

    match result {
        Ok(Ok(())) => {
            info!("gslb-dns shutdown complete");
            Ok(())
        }
        Ok(Err(e)) => {
            error!(error = %e, "gslb-dns error");
            Err(e.into())
        }
        Err(e) => {
            error!(error = %e, "gslb-dns task panicked");
            Err(e.into())
        }
    }
}

/// Cancel on SIGINT/SIGTERM; a second signal forces an immediate exit.
async fn shutdown_signals(cancel: CancellationToken) {
    wait_for_signal().await;
    info!("shutdown signal received");
    cancel.cancel();

    wait_for_signal().await;
    error!("second signal received, stopping now");
    std::process::exit(1);
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
