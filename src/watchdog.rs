use crate::procs::{ProcessEnumerator, ProcessHandle};

/// Result of a liveness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchdogStatus {
    /// Target is running; carries a fresh handle (the process may have
    /// been restarted externally since the last tick).
    Alive(ProcessHandle),
    /// No instance of the target is running. Fatal; the loop drains.
    Gone,
}

/// Liveness watchdog for the monitored executable.
///
/// Re-enumerates the process table by base name on every check instead of
/// trusting a cached handle. This is liveness only; it says nothing about
/// the application's internal health.
pub struct Watchdog {
    executable: String,
    enumerator: Box<dyn ProcessEnumerator>,
}

impl Watchdog {
    pub fn new(executable: &str, enumerator: Box<dyn ProcessEnumerator>) -> Self {
        Self {
            executable: executable.to_string(),
            enumerator,
        }
    }

    /// Check whether the target is still running.
    ///
    /// Returns the first matching instance; which one is arbitrary when
    /// several run, matching the attach semantics of "any live instance
    /// keeps the presence alive".
    pub fn check(&self) -> WatchdogStatus {
        match self
            .enumerator
            .running_instances(&self.executable)
            .into_iter()
            .next()
        {
            Some(handle) => {
                tracing::debug!(pid = handle.pid, "target is still running");
                WatchdogStatus::Alive(handle)
            }
            None => {
                tracing::info!(executable = %self.executable, "target is gone");
                WatchdogStatus::Gone
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procs::FakeEnumerator;

    fn handle(pid: u32) -> ProcessHandle {
        ProcessHandle {
            pid,
            name: "app".to_string(),
            command_line: "app".to_string(),
        }
    }

    #[test]
    fn test_alive_returns_fresh_handle() {
        let watchdog = Watchdog::new(
            "app.exe",
            Box::new(FakeEnumerator {
                instances: vec![handle(42), handle(43)],
            }),
        );
        assert_eq!(watchdog.check(), WatchdogStatus::Alive(handle(42)));
    }

    #[test]
    fn test_gone_when_no_instances() {
        let watchdog = Watchdog::new(
            "app.exe",
            Box::new(FakeEnumerator { instances: vec![] }),
        );
        assert_eq!(watchdog.check(), WatchdogStatus::Gone);
    }
}
