// onair engine
//
// Serves one live station:
//   - GET /stream for listeners (paced to the source's real bitrate)
//   - POST /controller for the operator (start, stop, play an effect)
//   - the web pages from the public dir
//
// Run it behind a reverse proxy for HTTPS and internet exposure.

use std::sync::Arc;

use onair_engine::{server, EngineConfig, Session, SoxTool};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cfg = EngineConfig::from_env();
    info!(
        "audio dir {}, fx dir {}, source {}",
        cfg.audio_dir.display(),
        cfg.fx_dir.display(),
        cfg.source
    );

    let tool = Arc::new(SoxTool::new(cfg.sox.clone(), cfg.mix.clone(), cfg.probe_timeout));
    let addr = cfg.bind;
    let session = Session::new(cfg, tool);

    let app = server::build_router(session.clone());

    info!("onair engine {} starting on http://{addr}", env!("CARGO_PKG_VERSION"));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Reap the driver and any mixer, then drop every listener channel
            // so open /stream bodies end and the server can drain.
            let state = session.stop().await;
            let closed = session.listeners().close_all();
            info!("pipeline {state} at shutdown; closed {closed} listeners");
        })
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let term = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("sigterm handler unavailable: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let term = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = term => {},
    }

    warn!("Shutdown signal received.");
}
