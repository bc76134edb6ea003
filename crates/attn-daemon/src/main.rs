//! attn daemon binary: loads configuration, opens the store, binds the
//! command socket and WebSocket listener, and runs until SIGINT/SIGTERM.

use anyhow::{Context, Result};
use attn_core::config::Config;
use attn_daemon::daemon::Daemon;
use tracing::info;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("failed to load config, using defaults: {e}");
        Config::defaults_for(&attn_core::config::binary_name())
    });

    attn_telemetry::logging::init_logging("attn-daemon", config.debug_level.as_tracing_filter());

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create data directory")?;
    }

    info!(
        socket = %config.socket_path.display(),
        db = %config.db_path.display(),
        ws_port = config.ws_port,
        "attn daemon starting"
    );

    let daemon = Daemon::new(config).await;
    let shutdown = daemon.shutdown_handle();
    let router = daemon.run().await.context("failed to start daemon services")?;

    let ws_listener = tokio::net::TcpListener::bind(("127.0.0.1", daemon.ws_port()))
        .await
        .context("failed to bind websocket listener")?;
    info!(addr = %ws_listener.local_addr().unwrap(), "websocket endpoint listening");

    let serve_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        let mut rx = serve_shutdown.subscribe();
        axum::serve(ws_listener, router)
            .with_graceful_shutdown(async move {
                let _ = rx.recv().await;
            })
            .await
    });

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("failed to install SIGTERM handler")?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
        _ = sigterm.recv() => info!("received SIGTERM"),
    }

    shutdown.trigger();
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), server).await;
    attn_core::socket_guard::remove_socket(&daemon.socket_path());

    info!("attn daemon stopped");
    Ok(())
}
