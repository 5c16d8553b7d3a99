use crate::capture::WindowObserver;
use crate::presence::{ActivityTracker, PresenceButton, PresenceRecord};
use crate::procs::ProcessHandle;
use crate::signals::{ShutdownSignal, TeardownGuard};
use crate::transport::PresenceTransport;
use crate::upload::Uploader;
use crate::watchdog::{Watchdog, WatchdogStatus};
use std::time::Duration;

/// Static branding carried into every published record.
#[derive(Debug, Clone)]
pub struct PresenceTemplate {
    pub details: String,
    pub large_image_text: String,
    pub small_image_key: String,
    pub small_image_text: String,
    pub button: Option<PresenceButton>,
}

impl PresenceTemplate {
    pub fn from_config(config: &crate::config::PresenceConfig) -> Self {
        let button = match (&config.button_label, &config.button_url) {
            (Some(label), Some(url)) => Some(PresenceButton {
                label: label.clone(),
                url: url.clone(),
            }),
            _ => None,
        };
        Self {
            details: config.details.clone(),
            large_image_text: config.large_image_text.clone(),
            small_image_key: config.small_image_key.clone(),
            small_image_text: config.small_image_text.clone(),
            button,
        }
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// Watchdog lost the target.
    ProcessGone,
    /// Shutdown signal fired.
    Cancelled,
}

/// Per-run mutable state. One of these exists for the whole run; every
/// field has a single owner and nothing here is globally reachable.
pub struct MonitorSession {
    /// Replaced with a fresh handle on every successful watchdog check.
    pub target: ProcessHandle,
    pub shutdown: ShutdownSignal,
    tracker: ActivityTracker,
    /// URL of the last successful upload; a failed upload leaves it as-is
    /// so the published record keeps the previous image.
    last_image_url: Option<String>,
}

type Clock = Box<dyn Fn() -> i64 + Send + Sync>;

/// The steady-state orchestrator: watchdog → observe → capture → upload →
/// publish, once per interval, strictly sequential within a tick.
pub struct MonitorLoop<T, U, O>
where
    T: PresenceTransport,
    U: Uploader,
    O: WindowObserver,
{
    session: MonitorSession,
    watchdog: Watchdog,
    observer: O,
    uploader: U,
    transport: T,
    template: PresenceTemplate,
    interval: Duration,
    teardown: TeardownGuard,
    clock: Clock,
}

impl<T, U, O> MonitorLoop<T, U, O>
where
    T: PresenceTransport,
    U: Uploader,
    O: WindowObserver,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        target: ProcessHandle,
        shutdown: ShutdownSignal,
        watchdog: Watchdog,
        observer: O,
        uploader: U,
        transport: T,
        template: PresenceTemplate,
        interval: Duration,
    ) -> Self {
        let clock: Clock = Box::new(|| chrono::Utc::now().timestamp());
        let tracker = ActivityTracker::new(clock());
        Self {
            session: MonitorSession {
                target,
                shutdown,
                tracker,
                last_image_url: None,
            },
            watchdog,
            observer,
            uploader,
            transport,
            template,
            interval,
            teardown: TeardownGuard::new(),
            clock,
        }
    }

    #[cfg(test)]
    fn with_clock(mut self, clock: Clock) -> Self {
        self.session.tracker = ActivityTracker::new(clock());
        self.clock = clock;
        self
    }

    /// Run until the target disappears or shutdown fires, then drain.
    pub async fn run(mut self) -> MonitorOutcome {
        let outcome = loop {
            if self.session.shutdown.is_triggered() {
                break MonitorOutcome::Cancelled;
            }

            match self.watchdog.check() {
                WatchdogStatus::Gone => break MonitorOutcome::ProcessGone,
                WatchdogStatus::Alive(handle) => self.session.target = handle,
            }

            self.tick().await;

            tokio::select! {
                _ = self.session.shutdown.wait() => break MonitorOutcome::Cancelled,
                _ = tokio::time::sleep(self.interval) => {}
            }
        };

        self.drain(outcome).await;
        outcome
    }

    /// One control cycle. Capture/upload/publish failures are logged and
    /// the loop carries on; only the watchdog ends it.
    async fn tick(&mut self) {
        let label = self.observer.observed_label(&self.session.target);
        let now = (self.clock)();
        if self.session.tracker.prepare(&label, now) {
            tracing::info!(label = %label, "observed state changed");
        }

        // The capture is refreshed every tick, label change or not; the
        // cost is amortized against the coarse interval.
        match self.observer.capture(&self.session.target) {
            Ok(png_bytes) => match self.uploader.upload(png_bytes).await {
                Ok(url) => {
                    tracing::debug!(url = %url, "capture uploaded");
                    self.session.last_image_url = Some(url);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "upload failed, keeping previous image");
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "capture failed, keeping previous image");
            }
        }

        let record = PresenceRecord {
            details: self.template.details.clone(),
            state: label.clone(),
            started_at: self.session.tracker.started_at(),
            large_image: self.session.last_image_url.clone(),
            large_image_text: self.template.large_image_text.clone(),
            small_image_key: self.template.small_image_key.clone(),
            small_image_text: self.template.small_image_text.clone(),
            button: self.template.button.clone(),
        };

        match self.transport.publish(&record).await {
            Ok(()) => self.session.tracker.mark_published(&label),
            Err(e) => {
                tracing::warn!(error = %e, "publish failed, skipping this tick");
            }
        }
    }

    /// Idempotent teardown: close the session, mark cancellation, log the
    /// terminal status. Safe against the signal path racing in.
    async fn drain(&mut self, outcome: MonitorOutcome) {
        if !self.teardown.arm() {
            return;
        }
        if let Err(e) = self.transport.close().await {
            tracing::warn!(error = %e, "failed to close presence session");
        }
        self.session.shutdown.trigger();
        tracing::info!(?outcome, "monitor stopped");
    }
}
