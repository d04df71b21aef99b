mod api;
mod bootstrap;
mod health;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use concierge_agent::SessionManager;
use concierge_core::config::{AppConfig, LoadOptions};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

fn init_logging(config: &AppConfig) {
    use concierge_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

/// Periodically drops sessions idle for longer than `max_idle` until
/// `shutdown` fires.
fn spawn_idle_sweep(
    sessions: Arc<SessionManager>,
    max_idle: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let period = max_idle.min(Duration::from_secs(60));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = sessions.evict_idle(max_idle).await;
                    if evicted > 0 {
                        tracing::info!(
                            event_name = "system.sessions.evicted",
                            correlation_id = "session-sweep",
                            evicted,
                            idle_secs = max_idle.as_secs(),
                            "evicted idle sessions"
                        );
                    }
                }
            }
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config)?;
    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    let listener = tokio::net::TcpListener::bind(&address).await?;

    let shutdown = CancellationToken::new();
    let router = api::router(api::AppState { sessions: app.sessions.clone() });
    let server = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned());
    let mut server = tokio::spawn(async move { server.await });
    let sweep = spawn_idle_sweep(
        app.sessions.clone(),
        Duration::from_secs(app.config.server.session_idle_secs),
        shutdown.clone(),
    );

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "concierge-server started"
    );

    tokio::select! {
        result = &mut server => {
            shutdown.cancel();
            result??;
            return Ok(());
        }
        signal = tokio::signal::ctrl_c() => signal?,
    }

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        active_sessions = app.sessions.session_count().await,
        "concierge-server stopping"
    );
    shutdown.cancel();
    let _ = sweep.await;

    match tokio::time::timeout(grace, server).await {
        Ok(result) => result??,
        Err(_) => tracing::warn!(
            event_name = "system.server.shutdown_timeout",
            correlation_id = "shutdown",
            grace_secs = grace.as_secs(),
            "in-flight requests did not finish before the shutdown deadline"
        ),
    }

    Ok(())
}
