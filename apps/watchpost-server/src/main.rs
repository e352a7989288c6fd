mod api;
mod live;
mod query;
mod state;
mod udp;

use std::{env, net::SocketAddr, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::{
    net::{TcpListener, UdpSocket},
    sync::watch,
};
use tracing::{info, warn};
use watchpost_ops::{ensure_directory, init_tracing};
use watchpost_types::config::WatchpostConfig;

use crate::state::AppState;

/// Camera relay and picture archive server.
#[derive(Debug, Parser)]
#[command(name = "watchpost-server", version)]
struct Args {
    /// TOML config file. Falls back to $WATCHPOST_CONFIG, then configs/dev.toml.
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config);
    init_tracing(&config.ops)?;
    ensure_directory(&config.archive.directory)?;

    let http_addr: SocketAddr = format!("{}:{}", config.server.bind_addr, config.server.http_port)
        .parse()
        .context("invalid server.bind_addr")?;
    let udp_addr = config
        .server
        .udp_port
        .map(|port| format!("{}:{port}", config.server.bind_addr));

    let state = AppState::build(config).await?;
    let (stop_tx, stop_rx) = watch::channel(false);

    let monitor = state.monitor.clone();
    let monitor_task = tokio::spawn({
        let stop_rx = stop_rx.clone();
        async move { monitor.run(stopped(stop_rx)).await }
    });

    let udp_task = match udp_addr {
        Some(addr) => {
            let socket = UdpSocket::bind(&addr)
                .await
                .with_context(|| format!("failed to bind udp listener on {addr}"))?;
            Some(tokio::spawn(udp::run(
                state.clone(),
                socket,
                stopped(stop_rx.clone()),
            )))
        }
        None => None,
    };

    let listener = TcpListener::bind(http_addr)
        .await
        .with_context(|| format!("failed to bind http listener on {http_addr}"))?;
    info!(addr = %http_addr, "watchpost server listening");
    axum::serve(listener, api::router(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    info!("shutting down");
    let _ = stop_tx.send(true);
    if let Err(err) = monitor_task.await {
        warn!(error = %err, "liveness monitor task failed");
    }
    if let Some(task) = udp_task {
        if let Err(err) = task.await {
            warn!(error = %err, "udp listener task failed");
        }
    }
    state.intake.close().await;
    Ok(())
}

async fn stopped(mut stop_rx: watch::Receiver<bool>) {
    let _ = stop_rx.wait_for(|stop| *stop).await;
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

fn load_config(from_args: Option<PathBuf>) -> WatchpostConfig {
    let from_env = env::var("WATCHPOST_CONFIG").ok().map(PathBuf::from);
    let path = from_args
        .or(from_env)
        .unwrap_or_else(|| PathBuf::from("configs/dev.toml"));
    match WatchpostConfig::from_file(&path) {
        Ok(cfg) => {
            if let Err(err) = cfg.validate() {
                eprintln!(
                    "Invalid config in '{}': {err}. Falling back to internal defaults.",
                    path.display()
                );
                default_config()
            } else {
                cfg
            }
        }
        Err(err) => {
            eprintln!(
                "Failed to load config from '{}': {err}. Falling back to internal defaults.",
                path.display()
            );
            default_config()
        }
    }
}

fn default_config() -> WatchpostConfig {
    let config = WatchpostConfig::default();
    debug_assert!(config.validate().is_ok());
    config
}
