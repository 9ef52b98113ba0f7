use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

pub fn spawn_shutdown_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(signal) => signal,
            Err(err) => {
                tracing::warn!(error = %err, "failed to register SIGINT handler");
                return;
            }
        };
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(err) => {
                tracing::warn!(error = %err, "failed to register SIGTERM handler");
                return;
            }
        };

        tokio::select! {
            _ = sigint.recv() => {
                tracing::info!("received SIGINT, shutting down");
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
            }
            _ = shutdown.cancelled() => return,
        }
        shutdown.cancel();
    });
}
