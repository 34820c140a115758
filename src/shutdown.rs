//! Signal-driven shutdown of the control loop.
//!
//! A signal flips the [`ShutdownCoordinator`] once. The control loop hears it
//! on a broadcast receiver and stops between passes; [`crate::run`] waits on
//! the watch side and then gives the in-flight pass [`SHUTDOWN_TIMEOUT`] to
//! finish.

use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::info;

/// Grace period for the in-flight pass after a shutdown signal.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct ShutdownCoordinator {
    notify: broadcast::Sender<()>,
    state: Arc<watch::Sender<bool>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(1);
        let (state, _) = watch::channel(false);
        Self {
            notify,
            state: Arc::new(state),
        }
    }

    /// Receiver handed to [`crate::HaController::run`].
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.notify.subscribe()
    }

    /// Begin shutdown. Later calls are no-ops.
    pub fn shutdown(&self) {
        let first = self
            .state
            .send_if_modified(|down| !std::mem::replace(down, true));
        if first {
            info!("Stopping HA controller");
            let _ = self.notify.send(());
        }
    }

    /// Resolve once shutdown began, including when it began before the call.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|down| *down).await;
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for SIGTERM or SIGINT and begin shutdown.
pub async fn forward_signals(coordinator: ShutdownCoordinator) -> Result<()> {
    let signal = wait_for_signal().await?;
    info!(signal, "Shutdown signal received");
    coordinator.shutdown();
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_notifies_once() {
        let coordinator = ShutdownCoordinator::new();
        let mut rx = coordinator.subscribe();
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));

        coordinator.shutdown();
        coordinator.shutdown();

        let first = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(first.is_ok());
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_after_signal() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.shutdown();
        let result =
            tokio::time::timeout(Duration::from_millis(100), coordinator.wait_for_shutdown()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let coordinator = ShutdownCoordinator::new();
        let waiter = coordinator.clone();
        let handle = tokio::spawn(async move { waiter.wait_for_shutdown().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.is_finished());

        coordinator.shutdown();
        let result = tokio::time::timeout(Duration::from_millis(100), handle).await;
        assert!(result.is_ok());
    }
}
