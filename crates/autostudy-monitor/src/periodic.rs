//! Cancellable background loops.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::MonitorError;

/// How long `stop` waits for a loop to wind down before aborting it.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

struct Running {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// A named loop that runs a tick, then sleeps for `interval` (or `backoff`
/// after a failed tick) until stopped.
///
/// Cancellation is only observed between ticks, so `stop` returns after the
/// tick in flight has finished (or after [`STOP_TIMEOUT`]). `start` and `stop`
/// are idempotent.
pub struct PeriodicTask {
    name: &'static str,
    running: Mutex<Option<Running>>,
}

impl PeriodicTask {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            running: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Spawn the loop on the current tokio runtime.
    ///
    /// Returns `false` if the loop was already running.
    pub fn start<F, Fut>(&self, interval: Duration, backoff: Duration, mut tick: F) -> bool
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), MonitorError>> + Send + 'static,
    {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            debug!(task = self.name, "Loop already running");
            return false;
        }

        let token = CancellationToken::new();
        let child = token.clone();
        let name = self.name;

        let handle = tokio::spawn(async move {
            info!(task = name, interval_ms = interval.as_millis() as u64, "Loop started");
            while !child.is_cancelled() {
                // A tick that has begun always runs to completion; `stop`
                // bounds the wait with its own timeout.
                let delay = match tick().await {
                    Ok(()) => interval,
                    Err(e) => {
                        warn!(task = name, error = %e, "Loop iteration failed, backing off");
                        backoff
                    }
                };

                tokio::select! {
                    biased;
                    _ = child.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            info!(task = name, "Loop stopped");
        });

        *running = Some(Running { token, handle });
        true
    }

    /// Cancel the loop and wait up to [`STOP_TIMEOUT`] for the current tick
    /// to finish.
    pub async fn stop(&self) {
        let Some(Running { token, mut handle }) = self.running.lock().take() else {
            return;
        };

        token.cancel();
        match tokio::time::timeout(STOP_TIMEOUT, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(task = self.name, error = %e, "Loop ended abnormally"),
            Err(_) => {
                warn!(task = self.name, "Loop did not stop in time, aborting");
                handle.abort();
            }
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.token.cancel();
        }
    }
}
