//! OS signal handling for cooperative run cancellation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use flowfuzz_core::prelude::*;

/// Spawn a task that sets `cancel` when a termination signal arrives
pub fn spawn_signal_handler(cancel: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if let Err(e) = wait_for_signal().await {
            error!("Signal handler error: {}", e);
            return;
        }

        info!("Shutdown signal received, cancelling run");
        eprintln!("Stopping after the current action...");
        cancel.store(true, Ordering::SeqCst);
    });
}

/// Wait for a termination signal
async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
        }

        Ok(())
    }

    #[cfg(windows)]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
        Ok(())
    }
}
