//! Shutdown on SIGTERM or SIGINT (Ctrl+C on Windows).

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Turns the first shutdown signal into a cancelled [`CancellationToken`].
///
/// Hand [`cancellation_token`](Self::cancellation_token) clones to every
/// subsystem that must stop, e.g. the axum graceful-shutdown future.
#[allow(missing_debug_implementations)] // TaskTracker doesn't impl Debug
pub struct SigDown {
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl SigDown {
    /// Registers the signal handlers and spawns the listener task.
    ///
    /// # Errors
    ///
    /// Returns an [`std::io::Error`] if a handler cannot be registered.
    #[allow(clippy::unnecessary_wraps)] // only fallible on Unix
    pub fn try_new() -> Result<Self, std::io::Error> {
        let token = CancellationToken::new();
        let task_tracker = TaskTracker::new();

        #[cfg(unix)]
        {
            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigint = signal(SignalKind::interrupt())?;
            let token = token.clone();
            task_tracker.spawn(async move {
                tokio::select! {
                    _ = sigterm.recv() => tracing::info!("SIGTERM received, shutting down"),
                    _ = sigint.recv() => tracing::info!("SIGINT received, shutting down"),
                }
                token.cancel();
            });
        }

        #[cfg(windows)]
        {
            let token = token.clone();
            task_tracker.spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("Ctrl+C received, shutting down");
                token.cancel();
            });
        }

        task_tracker.close();
        Ok(Self {
            task_tracker,
            cancellation_token: token,
        })
    }

    /// A token cancelled when the signal arrives.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Waits for the signal and for the listener task to finish.
    pub async fn recv(&self) {
        self.cancellation_token.cancelled().await;
        self.task_tracker.wait().await;
    }
}
