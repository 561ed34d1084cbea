//! Graceful shutdown
//!
//! Ctrl+C and SIGTERM are turned into a [`CancellationToken`] that every
//! long-running loop selects on: the reconnect backoff, the ingestor's
//! pacing sleep and the processor's delivery stream.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Wait for Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}

/// Spawn a task that cancels the returned token on the first shutdown signal
///
/// Must be called from within a tokio runtime.
pub fn spawn_shutdown_watcher() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown_signal() => trigger.cancel(),
            // Someone else cancelled first; stop listening
            _ = trigger.cancelled() => {},
        }
    });

    token
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_watcher_token_starts_uncancelled() {
        let token = spawn_shutdown_watcher();
        assert!(!token.is_cancelled());
        token.cancel();
    }

    #[tokio::test]
    async fn test_child_tokens_follow_parent() {
        let token = spawn_shutdown_watcher();
        let child = token.child_token();

        token.cancel();

        tokio::time::timeout(Duration::from_secs(1), child.cancelled())
            .await
            .unwrap();
    }
}
