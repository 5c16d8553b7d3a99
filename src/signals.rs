use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Cooperative shutdown signal for the monitor loop.
///
/// Set exactly once, never reset. Every clone observes the trigger; waiters
/// blocked in `wait()` wake immediately. The loop checks this at the top of
/// every sleep so cancellation during a tick interval drains right away.
#[derive(Clone)]
pub struct ShutdownSignal {
    inner: Arc<Inner>,
}

struct Inner {
    triggered: AtomicBool,
    notify: Notify,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                triggered: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Mark the signal. Idempotent; later calls are no-ops.
    pub fn trigger(&self) {
        if !self.inner.triggered.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// Wait until the signal fires. Returns immediately if already set.
    pub async fn wait(&self) {
        loop {
            if self.is_triggered() {
                return;
            }
            let notified = self.inner.notify.notified();
            // Re-check after registering the waiter so a trigger between
            // the flag load and `notified()` cannot be missed.
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Single-shot guard for teardown paths that can race.
///
/// Both the signal handler's drain and the loop's own drain call teardown;
/// whichever arms the guard first runs it, the loser is a no-op.
pub struct TeardownGuard {
    fired: AtomicBool,
}

impl TeardownGuard {
    pub fn new() -> Self {
        Self {
            fired: AtomicBool::new(false),
        }
    }

    /// Returns `true` exactly once, on the first call.
    pub fn arm(&self) -> bool {
        !self.fired.swap(true, Ordering::SeqCst)
    }
}

impl Default for TeardownGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Wire SIGINT/SIGTERM (Ctrl-C on all platforms) to the shutdown signal.
///
/// The handler only triggers the signal; actual teardown happens on the
/// monitor loop's drain path.
pub fn install_handlers(shutdown: ShutdownSignal) {
    #[cfg(unix)]
    {
        let sig = shutdown.clone();
        tokio::spawn(async move {
            let mut sigterm = match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            ) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to install SIGTERM handler");
                    return;
                }
            };
            sigterm.recv().await;
            tracing::info!("received SIGTERM, shutting down");
            sig.trigger();
        });
    }

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to install Ctrl-C handler");
            return;
        }
        tracing::info!("received Ctrl-C, shutting down");
        shutdown.trigger();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_trigger_is_idempotent() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_triggered());

        signal.trigger();
        assert!(signal.is_triggered());

        signal.trigger();
        assert!(signal.is_triggered());
    }

    #[test]
    fn test_clones_share_state() {
        let signal = ShutdownSignal::new();
        let clone = signal.clone();

        signal.trigger();
        assert!(clone.is_triggered());
    }

    #[tokio::test]
    async fn test_wait_returns_when_already_triggered() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        // Must not hang.
        tokio::time::timeout(Duration::from_secs(1), signal.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_wakes_on_trigger() {
        let signal = ShutdownSignal::new();
        let waiter = signal.clone();

        let handle = tokio::spawn(async move { waiter.wait().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        signal.trigger();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_teardown_guard_arms_exactly_once() {
        let guard = TeardownGuard::new();
        assert!(guard.arm());
        assert!(!guard.arm());
        assert!(!guard.arm());
    }

    #[test]
    fn test_teardown_guard_single_winner_across_threads() {
        let guard = std::sync::Arc::new(TeardownGuard::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let g = guard.clone();
            handles.push(std::thread::spawn(move || g.arm()));
        }
        let winners: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(winners, 1);
    }
}
