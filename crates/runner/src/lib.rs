//! A concurrent application runner for long-running processes with graceful
//! shutdown.
//!
//! The runner owns a set of named app processes and a list of closers:
//!
//! - App processes run concurrently until one fails or a shutdown signal
//!   (SIGINT/SIGTERM) arrives; either cancels the shared token so every
//!   process can wind down.
//! - Closers run afterwards, sequentially in registration order, regardless
//!   of how the processes ended. Shutdown teardown depends on ordering
//!   (sinks close before provisioned resources are removed), so closers are
//!   not raced against each other.
//! - `run` reports what happened instead of exiting, so the binary can map
//!   the outcome onto its exit codes.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

type ProcessFuture = Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send>>;
type Process = Box<dyn FnOnce(CancellationToken) -> ProcessFuture + Send>;
type Closer = Box<dyn FnOnce() -> ProcessFuture + Send>;

/// How a run ended.
#[derive(Debug, Default)]
pub struct RunOutcome {
    /// A shutdown signal was received.
    pub interrupted: bool,
    /// The first process failure, if any.
    pub failure: Option<anyhow::Error>,
}

impl RunOutcome {
    pub fn is_clean(&self) -> bool {
        !self.interrupted && self.failure.is_none()
    }
}

pub struct Runner {
    processes: Vec<(String, Process)>,
    closers: Vec<(String, Closer)>,
    closer_timeout: Duration,
    cancellation_token: CancellationToken,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    pub fn new() -> Self {
        Self {
            processes: Vec::new(),
            closers: Vec::new(),
            closer_timeout: Duration::from_secs(10),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Adds a named app process. Processes run concurrently; the first
    /// failure cancels the rest.
    pub fn with_process<F, Fut>(mut self, name: impl Into<String>, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        self.processes
            .push((name.into(), Box::new(|token| Box::pin(process(token)))));
        self
    }

    /// Adds a named closer. Closers run sequentially, in registration
    /// order, after every process has stopped; a failing closer does not
    /// stop the ones after it.
    pub fn with_closer<F, Fut>(mut self, name: impl Into<String>, closer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        self.closers
            .push((name.into(), Box::new(|| Box::pin(closer()))));
        self
    }

    /// Per-closer timeout, 10 seconds by default.
    pub fn with_closer_timeout(mut self, timeout: Duration) -> Self {
        self.closer_timeout = timeout;
        self
    }

    /// Uses an externally owned cancellation token, allowing callers to
    /// request shutdown programmatically.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Runs all processes to completion and then the closers.
    pub async fn run(self) -> RunOutcome {
        let token = self.cancellation_token;
        let mut join_set: JoinSet<(String, Result<(), anyhow::Error>)> = JoinSet::new();

        for (name, process) in self.processes {
            let process_token = token.clone();
            join_set.spawn(async move {
                let result = process(process_token).await;
                (name, result)
            });
        }

        let interrupted = spawn_signal_listener(token.clone());

        let mut failure = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((name, Ok(()))) => {
                    debug!(process = %name, "app process completed");
                }
                Ok((name, Err(err))) => {
                    error!(process = %name, error = %format!("{err:#}"), "app process failed");
                    if failure.is_none() {
                        failure = Some(err);
                    }
                    token.cancel();
                }
                Err(err) => {
                    error!(error = %err, "app process panicked");
                    if failure.is_none() {
                        failure = Some(anyhow::anyhow!("app process panicked: {err}"));
                    }
                    token.cancel();
                }
            }
        }

        for (name, closer) in self.closers {
            debug!(closer = %name, "running closer");
            match tokio::time::timeout(self.closer_timeout, closer()).await {
                Ok(Ok(())) => debug!(closer = %name, "closer completed"),
                Ok(Err(err)) => {
                    error!(closer = %name, error = %format!("{err:#}"), "closer failed")
                }
                Err(_) => error!(
                    closer = %name,
                    timeout_secs = self.closer_timeout.as_secs(),
                    "closer timed out"
                ),
            }
        }

        let interrupted = interrupted.load(std::sync::atomic::Ordering::SeqCst);
        if interrupted {
            info!("shut down after interrupt");
        }
        RunOutcome {
            interrupted,
            failure,
        }
    }
}

/// Cancels `token` on SIGINT or SIGTERM; the returned flag records whether
/// a signal arrived.
fn spawn_signal_listener(
    token: CancellationToken,
) -> std::sync::Arc<std::sync::atomic::AtomicBool> {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    let interrupted = Arc::new(AtomicBool::new(false));

    let ctrl_c_flag = Arc::clone(&interrupted);
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received interrupt signal");
                ctrl_c_flag.store(true, Ordering::SeqCst);
                ctrl_c_token.cancel();
            }
            Err(err) => error!(error = %err, "failed to install interrupt handler"),
        }
    });

    #[cfg(unix)]
    {
        let sigterm_flag = Arc::clone(&interrupted);
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                    info!("received SIGTERM");
                    sigterm_flag.store(true, Ordering::SeqCst);
                    token.cancel();
                }
                Err(err) => error!(error = %err, "failed to install SIGTERM handler"),
            }
        });
    }

    interrupted
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[tokio::test(start_paused = true)]
    async fn test_process_failure_cancels_the_rest() {
        let peer_cancelled = Arc::new(AtomicUsize::new(0));
        let peer_flag = Arc::clone(&peer_cancelled);

        let outcome = Runner::new()
            .with_process("failing", |_token| async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Err(anyhow::anyhow!("boom"))
            })
            .with_process("peer", move |token| async move {
                token.cancelled().await;
                peer_flag.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .run()
            .await;

        assert!(outcome.failure.is_some());
        assert!(!outcome.interrupted);
        assert_eq!(peer_cancelled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closers_run_in_order_even_after_failure() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let first = Arc::clone(&order);
        let second = Arc::clone(&order);

        let outcome = Runner::new()
            .with_process("failing", |_token| async move { Err(anyhow::anyhow!("boom")) })
            .with_closer("first", move || async move {
                first.lock().unwrap().push("first");
                Ok(())
            })
            .with_closer("second", move || async move {
                second.lock().unwrap().push("second");
                Err(anyhow::anyhow!("closer failure is non-fatal"))
            })
            .run()
            .await;

        assert!(outcome.failure.is_some());
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_cancellation_produces_clean_outcome() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            trigger.cancel();
        });

        let outcome = Runner::new()
            .with_cancellation_token(token)
            .with_process("worker", |token| async move {
                token.cancelled().await;
                Ok(())
            })
            .run()
            .await;

        assert!(outcome.failure.is_none());
        assert!(!outcome.interrupted);
        assert!(outcome.is_clean());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_closer_times_out_without_hanging() {
        let outcome = Runner::new()
            .with_process("worker", |_token| async move { Ok(()) })
            .with_closer_timeout(Duration::from_millis(50))
            .with_closer("slow", || async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            })
            .run()
            .await;

        assert!(outcome.is_clean());
    }
}
