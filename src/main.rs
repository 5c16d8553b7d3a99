mod capture;
mod config;
mod console;
mod locator;
mod monitor;
mod presence;
mod procs;
mod signals;
mod transport;
mod upload;
mod watchdog;

use clap::Parser;
use console::{Prompter, StdinPrompter};
use locator::LocateOptions;
use monitor::{MonitorLoop, PresenceTemplate};
use procs::SystemEnumerator;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Monitors a target desktop application, captures its main window every
/// tick, hosts the capture on a temp-file host, and republishes the URL
/// plus open-document state as rich presence.
#[derive(Parser, Debug)]
#[command(name = "vigil", version, about)]
struct Cli {
    /// Monitor this executable instead of the configured one
    #[arg(long = "target-process", alias = "targetProcess", value_name = "NAME")]
    target_process: Option<String>,

    /// Never launch the target; exit unless it's already running
    #[arg(long = "do-not-launch")]
    do_not_launch: bool,

    /// When no installation is found, prompt for a path instead of
    /// falling back to a running instance
    #[arg(long = "do-not-fallback-to-existing")]
    do_not_fallback_to_existing: bool,

    /// Config file path
    #[arg(short, long, default_value = "vigil.toml")]
    config: PathBuf,

    /// Extra logging (watchdog checks, upload results)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let mut config = match config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "could not load config");
            std::process::exit(1);
        }
    };
    if let Some(target) = cli.target_process {
        config.monitor.target_executable = target;
    }
    let executable = config.monitor.target_executable.clone();

    println!("vigil v{} - rich presence for {executable}", env!("CARGO_PKG_VERSION"));
    println!("Run this instead of {executable}.");

    let shutdown = signals::ShutdownSignal::new();
    signals::install_handlers(shutdown.clone());

    // Locating: one shot, terminal on failure.
    let options = LocateOptions {
        attach_only: cli.do_not_launch,
        no_fallback: cli.do_not_fallback_to_existing,
        search_concurrency: config.locator.search_concurrency,
        search_roots: config.locator.search_roots.clone(),
    };
    let enumerator = SystemEnumerator;
    let mut prompter = StdinPrompter;
    let target = match locator::locate(&executable, &options, &enumerator, &mut prompter).await
    {
        Ok(target) => target,
        Err(e) => {
            tracing::error!(error = %e, executable = %executable, "could not locate target");
            std::process::exit(1);
        }
    };
    tracing::info!(pid = target.pid, "monitoring target");

    // Connecting: the application id comes from config or the operator.
    let application_id = match config.monitor.application_id.clone() {
        Some(id) if !id.trim().is_empty() => id,
        _ => {
            match prompter.prompt("No application id preconfigured. Please specify it now:") {
                Ok(reply) if !reply.trim().is_empty() => reply.trim().to_string(),
                Ok(_) | Err(_) => {
                    tracing::error!("no application id provided");
                    std::process::exit(1);
                }
            }
        }
    };

    let (transport, mut events) = match transport::IpcTransport::connect(&application_id).await
    {
        Ok(connected) => connected,
        Err(e) => {
            tracing::error!(error = %e, "could not open presence session");
            std::process::exit(1);
        }
    };

    // Session notifications are advisory; log them and nothing else.
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                transport::SessionEvent::Ready { username } => {
                    tracing::info!(username = %username, "presence session ready");
                }
                transport::SessionEvent::PresenceUpdated { details, state } => {
                    tracing::info!(?details, ?state, "presence updated");
                }
            }
        }
    });

    let label_pattern = match regex::Regex::new(&config.presence.label_pattern) {
        Ok(pattern) => pattern,
        Err(e) => {
            tracing::error!(error = %e, "invalid label_pattern in config");
            std::process::exit(1);
        }
    };
    let uploader =
        match upload::TempHostClient::new(&config.upload.endpoint, &config.upload.user_agent) {
            Ok(client) => client,
            Err(e) => {
                tracing::error!(error = %e, "could not build upload client");
                std::process::exit(1);
            }
        };

    let monitor = MonitorLoop::new(
        target,
        shutdown,
        watchdog::Watchdog::new(&executable, Box::new(SystemEnumerator)),
        capture::XcapObserver::new(label_pattern),
        uploader,
        transport,
        PresenceTemplate::from_config(&config.presence),
        Duration::from_secs(config.monitor.interval_secs),
    );

    let outcome = monitor.run().await;
    tracing::info!(?outcome, "exiting");
}
