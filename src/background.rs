//! Background task tracking and shutdown draining.
//!
//! Handlers hand fire-and-forget work (mostly email) to
//! [`BackgroundTasks::run_in_background`]. Each task holds a tracker token for
//! its whole life, including when it panics, so [`BackgroundTasks::drain`] can
//! wait for the count to reach zero without being wedged by a crashed task.

use futures::FutureExt;
use std::{any::Any, future::Future, panic::AssertUnwindSafe, time::Duration};
use tokio_util::{
    sync::CancellationToken,
    task::{TaskTracker, task_tracker::TaskTrackerToken},
};
use tracing::{Instrument, debug, error, info, info_span, warn};

#[derive(Clone, Debug, Default)]
pub struct BackgroundTasks {
    tracker: TaskTracker,
}

impl BackgroundTasks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one unit of background work. Dropping the token releases it.
    #[must_use]
    pub fn acquire(&self) -> TaskTrackerToken {
        self.tracker.token()
    }

    /// Number of registered, unfinished tasks.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Spawn `future` as tracked background work.
    ///
    /// A panic inside the task is caught and logged; the registration is
    /// released either way.
    pub fn run_in_background<F>(&self, name: &'static str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.acquire();
        let span = info_span!("background.task", task = name);
        tokio::spawn(
            async move {
                let _token = token;
                match AssertUnwindSafe(future).catch_unwind().await {
                    Ok(()) => debug!("background task finished"),
                    Err(panic) => {
                        error!(panic = %panic_message(panic.as_ref()), "background task panicked");
                    }
                }
            }
            .instrument(span),
        );
    }

    /// Wait until every registered task has finished, or `timeout` elapses.
    ///
    /// Returns `true` when the count reached zero in time.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.tracker.close();
        info!(pending = self.in_flight(), ?timeout, "draining background tasks");

        if tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_ok()
        {
            info!("background tasks drained");
            true
        } else {
            warn!(
                remaining = self.in_flight(),
                "background tasks still running after drain timeout"
            );
            false
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Cancel the returned token on SIGINT or SIGTERM.
#[must_use]
pub fn shutdown_signal() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!("failed to listen for ctrl-c: {err}");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(err) => {
                    error!("failed to listen for SIGTERM: {err}");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => info!(signal = "SIGINT", "shutting down"),
            () = terminate => info!(signal = "SIGTERM", "shutting down"),
        }
        cancel.cancel();
    });
    token
}
