//! VPN Controller Daemon (vpnctld)
//!
//! Runs the connection-lifecycle controller against the simulated backend
//! and prints a JSON snapshot to stdout on every state change.
//!
//! # Usage
//!
//! ```bash
//! # Start with the built-in defaults and connect immediately
//! vpnctld --connect
//!
//! # Use a configuration file and keep the logs on exit
//! vpnctld --config /etc/vpnctl/vpnctl.toml --log-dir /var/log/vpnctl
//!
//! # Print the effective configuration and exit
//! vpnctld --config vpnctl.toml --check-config
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use libvpnctl::backend::{DummyBackend, MinimumDurations, TimedBackend};
use libvpnctl::captive_portal::{DelayedActivator, StaticCaptivePortalLookup};
use libvpnctl::config::{Settings, VpnctlConfig};
use libvpnctl::controller::{
    Collaborators, Controller, ControllerHandle, ControllerService, ControllerSignal,
};
use libvpnctl::device::StaticSession;
use libvpnctl::log_buffer::LogBuffer;
use libvpnctl::server::InMemoryServerCatalog;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// How long a graceful quit may take before the service is stopped anyway
const QUIT_TIMEOUT: Duration = Duration::from_secs(10);

/// VPN Controller Daemon
#[derive(Parser, Debug)]
#[command(name = "vpnctld")]
#[command(author = "vpnctl contributors")]
#[command(version)]
#[command(about = "VPN Controller Daemon - drives the tunnel connection lifecycle", long_about = None)]
struct Args {
    /// Configuration file (TOML); built-in defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Activate the tunnel once the controller is up
    #[arg(long)]
    connect: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    check_config: bool,

    /// Write the captured logs into this directory on exit
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

enum DaemonSignal {
    Shutdown,
    Reload,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args)?;

    if args.check_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let log_buffer = init_logging(&args);

    info!("Starting VPN Controller Daemon (vpnctld)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        "Location {} with {} known servers",
        config.location,
        config.servers.len()
    );

    let (settings_tx, settings_rx) = watch::channel(config.settings.clone());

    let collaborators = Collaborators {
        settings: settings_rx,
        session: Box::new(StaticSession::new(config.device.clone(), config.keys.clone())),
        servers: Box::new(InMemoryServerCatalog::new(
            config.servers.clone(),
            config.location.clone(),
        )),
        captive_portal_lookup: Arc::new(StaticCaptivePortalLookup::from_config(
            &config.captive_portal,
        )),
        captive_portal_activator: Arc::new(DelayedActivator::new(
            config.captive_portal.activation_delay(),
        )),
    };

    let backend = TimedBackend::new(DummyBackend::new(), MinimumDurations::from(&config.timers));
    let (controller, channels) =
        Controller::new(Box::new(backend), collaborators, config.timers.clone());

    let service = ControllerService::new(controller, channels);
    let handle = service.handle();
    let mut signals = handle.subscribe();
    let task = service.spawn();

    if args.connect {
        info!("Connecting on startup (--connect)");
        handle.activate()?;
    }

    let mut listener = SignalListener::new()?;

    loop {
        tokio::select! {
            daemon_signal = listener.next() => match daemon_signal {
                DaemonSignal::Shutdown => break,
                DaemonSignal::Reload => reload_settings(&args, &settings_tx),
            },
            signal = signals.recv() => match signal {
                Ok(signal) => report(&handle, signal).await,
                Err(RecvError::Lagged(skipped)) => warn!("Missed {} controller signals", skipped),
                Err(RecvError::Closed) => {
                    error!("Controller stopped unexpectedly");
                    break;
                }
            },
        }
    }

    info!("Shutting down VPN Controller Daemon...");
    if let Err(e) = quit(&handle, &mut signals).await {
        warn!("Graceful quit failed: {}", e);
    }
    let _ = handle.shutdown();

    let controller = task.await.context("Controller service panicked")?;
    info!("Controller stopped in state {}", controller.state());

    if let Some(dir) = &args.log_dir {
        let path = log_buffer
            .write_to_dir(dir)
            .with_context(|| format!("Failed to write logs into {}", dir.display()))?;
        info!("Logs written to {}", path.display());
    }

    info!("VPN Controller Daemon stopped");
    Ok(())
}

fn load_config(args: &Args) -> Result<VpnctlConfig> {
    match &args.config {
        Some(path) => VpnctlConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => Ok(VpnctlConfig::default()),
    }
}

/// Initialize logging based on command-line arguments.
/// Returns the in-memory buffer that captures every record.
fn init_logging(args: &Args) -> LogBuffer {
    let log_level = if args.verbose {
        "debug"
    } else {
        &args.log_level
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("vpnctld={},libvpnctl={}", log_level, log_level))
    });

    let log_buffer = LogBuffer::new();

    // The console honours the filter; the buffer keeps everything for --log-dir
    log_buffer
        .subscriber(filter, atty::is(atty::Stream::Stderr))
        .init();

    log_buffer
}

/// Re-read the configuration file and publish its settings
fn reload_settings(args: &Args, settings_tx: &watch::Sender<Settings>) {
    let Some(path) = &args.config else {
        info!("No configuration file to reload");
        return;
    };

    match VpnctlConfig::load(path) {
        Ok(config) => {
            info!("Settings reloaded from {}", path.display());
            settings_tx.send_replace(config.settings);
        }
        Err(e) => error!("Failed to reload {}: {}", path.display(), e),
    }
}

/// Print a snapshot for every state change
async fn report(handle: &ControllerHandle, signal: ControllerSignal) {
    match signal {
        ControllerSignal::StateChanged(state) => {
            info!("State changed: {}", state);
            match handle.snapshot().await {
                Ok(snapshot) => match serde_json::to_string(&snapshot) {
                    Ok(json) => println!("{}", json),
                    Err(e) => error!("Failed to serialize snapshot: {}", e),
                },
                Err(e) => warn!("Snapshot unavailable: {}", e),
            }
        }
        ControllerSignal::TimeChanged => debug!("Connection time changed"),
        ControllerSignal::Error(e) => error!("Controller error: {}", e),
        other => info!("Controller signal: {:?}", other),
    }
}

/// Ask the controller to quit and wait until it is safe to exit
async fn quit(
    handle: &ControllerHandle,
    signals: &mut broadcast::Receiver<ControllerSignal>,
) -> Result<()> {
    handle.quit()?;

    let ready = async {
        loop {
            match signals.recv().await {
                Ok(ControllerSignal::ReadyToQuit) => return Ok(()),
                Ok(other) => debug!("Waiting for quit, got {:?}", other),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => anyhow::bail!("controller stopped before quitting"),
            }
        }
    };

    tokio::time::timeout(QUIT_TIMEOUT, ready)
        .await
        .context("Timed out waiting for the tunnel to go down")?
}

/// Unix signals (SIGTERM, SIGINT, SIGHUP)
#[cfg(unix)]
struct SignalListener {
    sigterm: tokio::signal::unix::Signal,
    sigint: tokio::signal::unix::Signal,
    sighup: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl SignalListener {
    fn new() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            sigterm: signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?,
            sigint: signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?,
            sighup: signal(SignalKind::hangup()).context("Failed to register SIGHUP handler")?,
        })
    }

    async fn next(&mut self) -> DaemonSignal {
        tokio::select! {
            _ = self.sigterm.recv() => {
                info!("Received SIGTERM, initiating graceful shutdown");
                DaemonSignal::Shutdown
            }
            _ = self.sigint.recv() => {
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                DaemonSignal::Shutdown
            }
            _ = self.sighup.recv() => {
                info!("Received SIGHUP, reloading configuration");
                DaemonSignal::Reload
            }
        }
    }
}

#[cfg(not(unix))]
struct SignalListener;

#[cfg(not(unix))]
impl SignalListener {
    fn new() -> Result<Self> {
        Ok(Self)
    }

    async fn next(&mut self) -> DaemonSignal {
        // On non-Unix platforms, just wait for Ctrl+C
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Received Ctrl+C, initiating graceful shutdown");
        DaemonSignal::Shutdown
    }
}
