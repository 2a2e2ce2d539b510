//! Graceful shutdown handling
//!
//! Cross-platform signal handling that cancels a shutdown token:
//! SIGINT and SIGTERM on unix, Ctrl+C elsewhere.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Cancel `shutdown` when the process is asked to terminate.
pub fn spawn_signal_listener(shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            () = wait_for_signal() => shutdown.cancel(),
            () = shutdown.cancelled() => {}
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigint, mut sigterm) = match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
        (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
        (Err(e), _) | (_, Err(e)) => {
            error!(error = %e, "failed to install signal handlers, falling back to Ctrl+C");
            wait_for_ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigint.recv() => info!("SIGINT received - initiating graceful shutdown"),
        _ = sigterm.recv() => info!("SIGTERM received - initiating graceful shutdown"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Ctrl+C received - initiating graceful shutdown"),
        Err(e) => {
            error!(error = %e, "failed to listen for Ctrl+C; shutdown only via token");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listener_exits_when_token_cancelled_elsewhere() {
        let shutdown = CancellationToken::new();
        let listener = spawn_signal_listener(shutdown.clone());
        shutdown.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), listener).await.unwrap().unwrap();
    }
}
