//! Restart-on-failure supervision for background tasks.

use std::future::Future;
use std::sync::Arc;

use bridge_core::{MetricKind, Metrics};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Shared "is quitting" flag.
///
/// Cloning shares the flag. Tasks poll [`is_quitting`](Self::is_quitting) or
/// await [`wait`](Self::wait).
#[derive(Debug, Clone)]
pub struct QuitSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for QuitSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl QuitSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Raise the flag. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_quitting(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the flag is raised.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so this only errors if it never fires.
        let _ = rx.wait_for(|quitting| *quitting).await;
    }
}

/// Run `start` as a task and launch it again whenever it panics or returns
/// while `quit` is not raised.
///
/// Every relaunch observes [`MetricKind::GoroutineFailure`] labelled with the
/// task name. The returned handle resolves once the task has finished with
/// the flag raised.
pub fn supervise<F, Fut>(
    name: impl Into<String>,
    quit: QuitSignal,
    metrics: Arc<dyn Metrics>,
    start: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let name = name.into();
    tokio::spawn(async move {
        loop {
            let outcome = tokio::spawn(start()).await;
            if quit.is_quitting() {
                debug!(worker = %name, "Supervised task stopped");
                break;
            }

            match outcome {
                Ok(()) => error!(worker = %name, "Recovering from unexpected exit"),
                Err(err) if err.is_panic() => {
                    error!(worker = %name, error = %err, "Recovering from panic")
                }
                Err(err) => {
                    // Cancelled: the runtime is going away.
                    debug!(worker = %name, error = %err, "Supervised task cancelled");
                    break;
                }
            }
            metrics.observe(MetricKind::GoroutineFailure, &[("worker", name.as_str())]);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use mock_bridge::RecordingMetrics;

    #[tokio::test]
    async fn test_quit_signal() {
        let quit = QuitSignal::new();
        assert!(!quit.is_quitting());

        let waiter = {
            let quit = quit.clone();
            tokio::spawn(async move { quit.wait().await })
        };
        quit.trigger();
        quit.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(quit.is_quitting());
    }

    #[tokio::test]
    async fn test_relaunch_after_panic() {
        let quit = QuitSignal::new();
        let metrics = Arc::new(RecordingMetrics::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let handle = {
            let quit = quit.clone();
            let runs = runs.clone();
            supervise("flaky", quit.clone(), metrics.clone(), move || {
                let quit = quit.clone();
                let runs = runs.clone();
                async move {
                    if runs.fetch_add(1, Ordering::SeqCst) == 0 {
                        panic!("first run fails");
                    }
                    quit.wait().await;
                }
            })
        };

        for _ in 0..100 {
            if runs.load(Ordering::SeqCst) >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        quit.trigger();
        handle.await.unwrap();
        assert_eq!(metrics.count(MetricKind::GoroutineFailure), 1);
        assert_eq!(
            metrics.count_with(MetricKind::GoroutineFailure, "worker", "flaky"),
            1
        );
    }

    #[tokio::test]
    async fn test_relaunch_after_unexpected_exit() {
        let quit = QuitSignal::new();
        let metrics = Arc::new(RecordingMetrics::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let handle = {
            let quit = quit.clone();
            let runs = runs.clone();
            supervise("early-exit", quit.clone(), metrics.clone(), move || {
                let quit = quit.clone();
                let runs = runs.clone();
                async move {
                    if runs.fetch_add(1, Ordering::SeqCst) < 2 {
                        return;
                    }
                    quit.wait().await;
                }
            })
        };

        for _ in 0..100 {
            if runs.load(Ordering::SeqCst) >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        quit.trigger();
        handle.await.unwrap();
        assert_eq!(metrics.count(MetricKind::GoroutineFailure), 2);
    }

    #[tokio::test]
    async fn test_no_relaunch_when_quitting() {
        let quit = QuitSignal::new();
        let metrics = Arc::new(RecordingMetrics::new());
        quit.trigger();

        let handle = supervise("done", quit.clone(), metrics.clone(), || async {});
        handle.await.unwrap();
        assert_eq!(metrics.count(MetricKind::GoroutineFailure), 0);
    }
}
