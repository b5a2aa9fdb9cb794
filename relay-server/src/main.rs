mod config;
mod http;
mod logging;

use anyhow::Result;
use clap::Parser;
use relay_sfu::{RtcEngine, Sfu};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "relay-server")]
#[command(about = "Minimal WebRTC selective forwarding unit", long_about = None)]
struct Args {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, env = "RELAY_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load and validate configuration (fail fast on misconfigurations)
    let config = Config::load(args.config.as_deref())?;
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("Relay SFU starting...");
    info!("HTTP address: {}", config.http_address());

    // 3. Build the WebRTC engine and the SFU hub
    let engine = RtcEngine::new(&config.sfu).map_err(|e| {
        error!("Failed to initialize WebRTC engine: {}", e);
        anyhow::anyhow!("WebRTC engine initialization failed: {e}")
    })?;
    let sfu = Sfu::new(config.sfu.clone(), Arc::new(engine));

    // 4. Background keyframe solicitation
    let shutdown = CancellationToken::new();
    let solicitor = sfu.start_keyframe_solicitor(shutdown.clone());

    // 5. Serve HTTP until a shutdown signal arrives
    let listener = tokio::net::TcpListener::bind(config.http_address()).await?;
    info!("HTTP server listening on {}", listener.local_addr()?);

    let router = http::create_router(sfu);
    let graceful = {
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            info!("Shutdown signal received, starting graceful shutdown...");
            shutdown.cancel();
        }
    };

    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(graceful)
        .await
    {
        error!("HTTP server error: {}", e);
    }

    shutdown.cancel();
    if let Err(e) = solicitor.await {
        error!("Keyframe solicitor task failed: {}", e);
    }

    info!("Relay SFU stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}
