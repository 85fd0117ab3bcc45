use snafu::{ResultExt, Snafu};
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::watch,
};

#[derive(Debug, Snafu)]
#[snafu(display("failed to construct signal watcher"))]
pub struct SignalError {
    source: std::io::Error,
}

/// Fans a single shutdown signal out to every task holding a handle.
pub struct ShutdownWatcher {
    watch_rx: watch::Receiver<()>,
}

impl ShutdownWatcher {
    /// Completes all handles once either `SIGTERM` or `SIGINT` is received.
    pub fn terminate_or_interrupt() -> Result<Self, SignalError> {
        let mut sigterm = signal(SignalKind::terminate()).context(SignalSnafu)?;
        let mut sigint = signal(SignalKind::interrupt()).context(SignalSnafu)?;
        let (watch_tx, watch_rx) = watch::channel(());

        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                _ = sigint.recv() => tracing::info!("received SIGINT, shutting down"),
            }
            watch_tx.send(())
        });

        Ok(Self { watch_rx })
    }

    /// Acquires a handle which completes once the signal was received.
    pub fn handle(&self) -> impl Future<Output = ()> + Send + Sync + 'static {
        let mut watch_rx = self.watch_rx.clone();

        async move {
            watch_rx.changed().await.ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn handles_stay_pending_without_signal() {
        let watcher = ShutdownWatcher::terminate_or_interrupt().expect("signal handlers install");

        let result = tokio::time::timeout(Duration::from_millis(50), watcher.handle()).await;
        assert!(result.is_err());
    }
}
