use crate::console::Prompter;
use crate::procs::{ProcessEnumerator, ProcessHandle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Errors from the one-shot discovery phase. All of these are terminal for
/// startup; there is no retry loop around operator prompts.
#[derive(Debug)]
pub enum LocateError {
    /// Attach requested (or fallen back to) but nothing is running.
    NotRunning,
    /// Operator reply didn't name a listed candidate.
    InvalidSelection(String),
    /// Manually entered path doesn't point at a file.
    InvalidPath(PathBuf),
    Spawn {
        path: PathBuf,
        source: std::io::Error,
    },
    Prompt(std::io::Error),
}

impl std::fmt::Display for LocateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocateError::NotRunning => write!(f, "target process isn't running"),
            LocateError::InvalidSelection(reply) => {
                write!(f, "invalid selection: '{reply}'")
            }
            LocateError::InvalidPath(path) => {
                write!(f, "invalid path: '{}'", path.display())
            }
            LocateError::Spawn { path, source } => {
                write!(f, "failed to launch {}: {}", path.display(), source)
            }
            LocateError::Prompt(e) => write!(f, "failed to read operator input: {e}"),
        }
    }
}

impl std::error::Error for LocateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LocateError::Spawn { source, .. } => Some(source),
            LocateError::Prompt(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LocateOptions {
    /// Only attach to a running instance; never launch.
    pub attach_only: bool,
    /// When no installation is found, prompt for a manual path instead of
    /// falling back to a running instance.
    pub no_fallback: bool,
    /// Worker cap for the install-root search.
    pub search_concurrency: usize,
    /// Roots to search; empty means platform defaults.
    pub search_roots: Vec<PathBuf>,
}

/// An installation picked for launch, with the operator's disambiguation
/// index when more than one candidate existed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredExecutable {
    pub path: PathBuf,
    pub selection: Option<usize>,
}

/// Find or launch the target and return the process to monitor.
///
/// Two explicit phases: launch mode searches installations and spawns;
/// when nothing is installed and fallback is allowed, attach mode runs as
/// a single bounded second attempt (never recursively).
pub async fn locate(
    executable: &str,
    options: &LocateOptions,
    enumerator: &dyn ProcessEnumerator,
    prompter: &mut dyn Prompter,
) -> Result<ProcessHandle, LocateError> {
    if options.attach_only {
        return attach_existing(executable, enumerator, prompter);
    }

    tracing::info!(executable, "searching for an installation");
    let roots = if options.search_roots.is_empty() {
        default_search_roots()
    } else {
        options.search_roots.clone()
    };
    let matches = search_roots(executable, &roots, options.search_concurrency).await;

    let discovered = match matches.len() {
        0 => {
            tracing::info!(executable, "no installation found");
            if options.no_fallback {
                let reply = prompter
                    .prompt("No installation found. Please specify the executable path manually:")
                    .map_err(LocateError::Prompt)?;
                let path = PathBuf::from(reply.trim());
                if !path.is_file() {
                    return Err(LocateError::InvalidPath(path));
                }
                DiscoveredExecutable {
                    path,
                    selection: None,
                }
            } else {
                tracing::info!("trying a running instance instead");
                return attach_existing(executable, enumerator, prompter);
            }
        }
        1 => {
            tracing::info!(path = %matches[0].display(), "found installation");
            DiscoveredExecutable {
                path: matches[0].clone(),
                selection: None,
            }
        }
        _ => select_installation(&matches, prompter)?,
    };

    if let Some(index) = discovered.selection {
        tracing::info!(index, path = %discovered.path.display(), "using selected installation");
    }
    launch(&discovered.path).await
}

/// Enumerate running instances and pick one.
fn attach_existing(
    executable: &str,
    enumerator: &dyn ProcessEnumerator,
    prompter: &mut dyn Prompter,
) -> Result<ProcessHandle, LocateError> {
    let mut instances = enumerator.running_instances(executable);
    match instances.len() {
        0 => Err(LocateError::NotRunning),
        1 => {
            let handle = instances.remove(0);
            tracing::info!(pid = handle.pid, "found one running instance");
            Ok(handle)
        }
        _ => {
            // Shortest command line first: the plain launch is usually the
            // one the operator wants, not a helper with argument junk.
            instances.sort_by_key(|h| h.command_line.len());

            let pid_width = instances
                .iter()
                .map(|h| h.pid.to_string().len())
                .max()
                .unwrap_or(0);
            let mut message = String::from(
                "Multiple instances running. Choose one by PID \
                 (check the command line; the right one is usually the simplest):",
            );
            for handle in &instances {
                message.push_str(&format!(
                    "\n[{:>pid_width$}] {} '{}'",
                    handle.pid, handle.name, handle.command_line
                ));
            }

            let reply = prompter.prompt(&message).map_err(LocateError::Prompt)?;
            let pid: u32 = reply
                .trim()
                .parse()
                .map_err(|_| LocateError::InvalidSelection(reply.clone()))?;
            instances
                .into_iter()
                .find(|h| h.pid == pid)
                .ok_or(LocateError::InvalidSelection(reply))
        }
    }
}

/// Present indexed install candidates and resolve the operator's pick.
fn select_installation(
    matches: &[PathBuf],
    prompter: &mut dyn Prompter,
) -> Result<DiscoveredExecutable, LocateError> {
    let mut message = String::from("Multiple installations found. Choose one by index:");
    for (index, path) in matches.iter().enumerate() {
        message.push_str(&format!("\n[{index}] {}", path.display()));
    }

    let reply = prompter.prompt(&message).map_err(LocateError::Prompt)?;
    let index: usize = reply
        .trim()
        .parse()
        .map_err(|_| LocateError::InvalidSelection(reply.clone()))?;
    let path = matches
        .get(index)
        .ok_or_else(|| LocateError::InvalidSelection(reply.clone()))?
        .clone();

    Ok(DiscoveredExecutable {
        path,
        selection: Some(index),
    })
}

/// Spawn the chosen executable and hand back a monitorable handle.
///
/// The child is reaped by a detached task; liveness tracking goes through
/// process enumeration, not this handle, so a restart by the operator
/// doesn't break the watchdog.
async fn launch(path: &Path) -> Result<ProcessHandle, LocateError> {
    let mut child = tokio::process::Command::new(path)
        .spawn()
        .map_err(|e| LocateError::Spawn {
            path: path.to_path_buf(),
            source: e,
        })?;
    let pid = child.id().unwrap_or(0);
    tracing::info!(pid, path = %path.display(), "launched target");

    tokio::spawn(async move {
        let _ = child.wait().await;
    });

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(ProcessHandle {
        pid,
        name,
        command_line: path.display().to_string(),
    })
}

/// Search every root for `executable`, at most `cap` roots in flight.
pub async fn search_roots(executable: &str, roots: &[PathBuf], cap: usize) -> Vec<PathBuf> {
    let exe = executable.to_string();
    search_roots_with(roots, cap, move |root| scan_root(root, &exe)).await
}

/// Cap-bounded fan-out over search roots; results merged unordered.
///
/// Generic over the per-root scan so tests can instrument concurrency.
async fn search_roots_with<F>(roots: &[PathBuf], cap: usize, scan: F) -> Vec<PathBuf>
where
    F: Fn(&Path) -> Vec<PathBuf> + Send + Sync + 'static,
{
    let semaphore = Arc::new(Semaphore::new(cap.max(1)));
    let scan = Arc::new(scan);

    let mut tasks = Vec::new();
    for root in roots {
        let root = root.clone();
        let semaphore = Arc::clone(&semaphore);
        let scan = Arc::clone(&scan);
        tasks.push(tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return Vec::new(),
            };
            // The permit is held across the blocking scan, which is what
            // actually bounds disk pressure.
            tokio::task::spawn_blocking(move || scan(&root))
                .await
                .unwrap_or_default()
        }));
    }

    let mut matches = Vec::new();
    for task in tasks {
        if let Ok(found) = task.await {
            matches.extend(found);
        }
    }
    matches
}

/// Recursive scan of one root; unreadable directories are skipped.
fn scan_root(root: &Path, executable: &str) -> Vec<PathBuf> {
    let pattern = format!("{}/**/{}", root.display(), executable);
    match glob::glob(&pattern) {
        Ok(paths) => paths
            .filter_map(Result::ok)
            .filter(|p| p.is_file())
            .collect(),
        Err(e) => {
            tracing::warn!(root = %root.display(), error = %e, "skipping unsearchable root");
            Vec::new()
        }
    }
}

/// Platform-standard install roots: every volume crossed with its
/// "Program Files"-class folders.
fn default_search_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();

    #[cfg(windows)]
    {
        for letter in b'A'..=b'Z' {
            let drive = PathBuf::from(format!("{}:\\", letter as char));
            if !drive.exists() {
                continue;
            }
            for folder in ["Program Files", "Program Files (x86)"] {
                let root = drive.join(folder);
                if root.exists() {
                    roots.push(root);
                }
            }
        }
    }

    #[cfg(not(windows))]
    {
        for candidate in ["/opt", "/usr/local", "/Applications"] {
            let root = PathBuf::from(candidate);
            if root.exists() {
                roots.push(root);
            }
        }
    }

    roots
}
