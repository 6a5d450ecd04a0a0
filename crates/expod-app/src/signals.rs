//! Shutdown on SIGINT/SIGTERM (Ctrl+C on Windows)

use std::future::Future;

use expod_core::prelude::*;

use crate::manager::DevServerManager;

/// Wait for a termination signal, then stop every dev server the manager owns
pub async fn stop_on_signal(manager: &DevServerManager) -> Result<()> {
    stop_when(manager, wait_for_signal()).await
}

/// Stop the manager once `trigger` resolves.
///
/// A trigger that fails to install still stops the servers, so the process
/// never exits with a port or tunnel left open.
pub async fn stop_when<F>(manager: &DevServerManager, trigger: F) -> Result<()>
where
    F: Future<Output = Result<&'static str>>,
{
    match trigger.await {
        Ok(signal) => info!("Received {}, stopping dev servers", signal),
        Err(e) => error!("Signal handler error: {}", e),
    }
    manager.stop().await
}

/// Resolve with the name of the first termination signal received
pub async fn wait_for_signal() -> Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())
            .map_err(|e| Error::process(format!("Failed to install SIGINT handler: {}", e)))?;
        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| Error::process(format!("Failed to install SIGTERM handler: {}", e)))?;

        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        };
        Ok(name)
    }

    #[cfg(windows)]
    {
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| Error::process(format!("Failed to listen for Ctrl+C: {}", e)))?;
        Ok("Ctrl+C")
    }
}
