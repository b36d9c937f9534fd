use tokio::signal::unix::SignalKind;
use tokio::signal::unix::signal;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Cancels an in-flight access run on SIGTERM or SIGINT.
///
/// A background task listens for either signal and cancels the token handed
/// out by [`SigDown::cancellation_token`]. The controller notices between
/// steps, so a payment already being executed still completes.
pub struct SigDown {
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
    stop: CancellationToken,
}

impl SigDown {
    /// Registers the signal handlers.
    pub fn try_new() -> Result<Self, std::io::Error> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let cancellation_token = CancellationToken::new();
        let stop = CancellationToken::new();
        let task_tracker = TaskTracker::new();
        {
            let cancellation_token = cancellation_token.clone();
            let stop = stop.clone();
            task_tracker.spawn(async move {
                let signal = tokio::select! {
                    _ = sigterm.recv() => "SIGTERM",
                    _ = sigint.recv() => "SIGINT",
                    _ = stop.cancelled() => return,
                };
                tracing::warn!(signal, "Cancelling access run");
                cancellation_token.cancel();
            });
        }
        task_tracker.close();
        Ok(Self {
            task_tracker,
            cancellation_token,
            stop,
        })
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Stops listening and waits for the listener task to finish.
    pub async fn shutdown(self) {
        self.stop.cancel();
        self.task_tracker.wait().await;
    }
}
