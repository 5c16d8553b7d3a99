use std::path::Path;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

/// A running instance of the monitored executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
    pub name: String,
    /// Full invocation command line, space-joined. Empty when the OS
    /// withholds it (e.g. permission denied on /proc).
    pub command_line: String,
}

/// Strip the extension from an executable name: "App.exe" -> "App".
///
/// Process tables report base names, so every lookup goes through this.
pub fn base_name(executable: &str) -> String {
    Path::new(executable)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| executable.to_string())
}

/// Source of running-process snapshots.
///
/// The watchdog and the locator's attach path both re-enumerate on every
/// call rather than trusting cached handles; this trait lets tests swap in
/// a canned process table.
pub trait ProcessEnumerator: Send + Sync {
    /// All running instances whose base name matches `executable`
    /// (extension-insensitive, ASCII case-insensitive).
    fn running_instances(&self, executable: &str) -> Vec<ProcessHandle>;
}

/// Live enumerator over the OS process table.
pub struct SystemEnumerator;

impl ProcessEnumerator for SystemEnumerator {
    fn running_instances(&self, executable: &str) -> Vec<ProcessHandle> {
        let wanted = base_name(executable);
        let refresh = ProcessRefreshKind::nothing()
            .with_cmd(UpdateKind::Always)
            .with_exe(UpdateKind::Always);

        let mut system = System::new();
        system.refresh_processes_specifics(ProcessesToUpdate::All, true, refresh);

        let mut instances = Vec::new();
        for (pid, process) in system.processes() {
            let name = process.name().to_string_lossy().into_owned();
            if !base_name(&name).eq_ignore_ascii_case(&wanted) {
                continue;
            }

            let command_line = if process.cmd().is_empty() {
                process
                    .exe()
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default()
            } else {
                process
                    .cmd()
                    .iter()
                    .map(|arg| arg.to_string_lossy())
                    .collect::<Vec<_>>()
                    .join(" ")
            };

            instances.push(ProcessHandle {
                pid: pid.as_u32(),
                name,
                command_line,
            });
        }
        instances
    }
}

#[cfg(test)]
pub struct FakeEnumerator {
    pub instances: Vec<ProcessHandle>,
}

#[cfg(test)]
impl ProcessEnumerator for FakeEnumerator {
    fn running_instances(&self, _executable: &str) -> Vec<ProcessHandle> {
        self.instances.clone()
    }
}
