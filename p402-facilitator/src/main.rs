//! p402 facilitator HTTP server.
//!
//! # Usage
//!
//! ```bash
//! p402-facilitator --config /etc/p402/config.toml
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` - Path to the TOML configuration file (default: `config.toml`)
//! - `HOST` - Override bind address (default: `0.0.0.0`)
//! - `PORT` - Override port (default: `4021`)
//! - `RUST_LOG` - Log level filter (default: `info`)
//! - `OTEL_EXPORTER_OTLP_*` - Enable OpenTelemetry export
//!
//! A `.env` file in the working directory is loaded first.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::http::Method;
use clap::Parser;
use tower_http::cors;

use p402_facilitator::{
    FacilitatorConfig, FacilitatorState, LocalFacilitator, SigDown, Telemetry, facilitator_router,
};

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the configuration file.
    #[arg(long, short, env = "CONFIG", default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let _ = rustls::crypto::ring::default_provider().install_default();
    let telemetry = Telemetry::init();

    let result = run(Args::parse()).await;
    if let Err(e) = result {
        tracing::error!("Facilitator failed: {e}");
        drop(telemetry);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = FacilitatorConfig::load(&args.config)?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        chains = config.chains.len(),
        "Loaded configuration"
    );

    let facilitator = LocalFacilitator::from_config(&config)?;
    if facilitator.is_empty() {
        tracing::warn!("No usable chains, /supported will be empty");
    } else {
        let networks: Vec<&str> = facilitator.networks().collect();
        tracing::info!(?networks, "Serving networks");
    }
    let state: FacilitatorState = Arc::new(facilitator);

    let app = facilitator_router(state)
        .layer(Telemetry::http_tracing())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Facilitator listening on http://{addr}");

    let sig_down = SigDown::try_new()?;
    let shutdown = sig_down.cancellation_token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("Facilitator shut down gracefully");
    Ok(())
}
