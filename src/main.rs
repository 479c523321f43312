use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;

use lifecare_realtime::config::Settings;
use lifecare_realtime::telemetry::init_telemetry;
use lifecare_realtime::{RealtimeChannel, SessionController, WILDCARD_KIND};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::new()?;
    settings.channel.validate()?;

    let _telemetry = init_telemetry(&settings.otel, &settings.logging)?;
    tracing::info!("Configuration loaded");

    let user_id = settings
        .session
        .user_id
        .clone()
        .context("LIFECARE_SESSION__USER_ID is not set")?;
    let token = settings
        .session
        .token
        .clone()
        .context("LIFECARE_SESSION__TOKEN is not set")?;

    let channel = Arc::new(RealtimeChannel::websocket(settings.channel.clone()));
    let session = SessionController::new(channel.clone());

    session.start(&user_id, &token)?;

    let _log_all = channel.subscribe(WILDCARD_KIND, |message| {
        tracing::info!(kind = %message.kind(), body = %message.body(), "Message received");
    });

    shutdown_signal_handler().await;

    tracing::info!(
        unread = session.unread_count(),
        status = ?session.connection_status(),
        "Closing realtime session"
    );
    channel.shutdown().await;
    session.stop();

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal_handler() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
