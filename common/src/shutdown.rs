/// Resolves when the process should drain: SIGINT (Ctrl+C) locally,
/// SIGTERM from the cluster. Callers hand this to their server's
/// graceful-shutdown hook or a cancellation token.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");

        tokio::select! {
            _ = sigint.recv()  => tracing::info!(signal = "SIGINT", "shutting down"),
            _ = sigterm.recv() => tracing::info!(signal = "SIGTERM", "shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        // Only Ctrl+C is available off-Unix.
        tokio::signal::ctrl_c()
            .await
            .expect("install Ctrl+C handler");
    }
}
