//! ---
//! upd_section: "05-daemon"
//! upd_subsection: "binary"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Binary entrypoint for the Updraft daemon."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use prometheus::{Encoder, TextEncoder};
use semver::Version;
use tokio::signal;
use tracing::{debug, info, warn};
use updraft_bridge::Phase;
use updraft_common::config::AppConfig;
use updraft_common::logging::init_tracing;
use updraft_common::version::VersionInfo;
use updraft_core::{
    new_registry, ControllerMetrics, ControllerSettings, SharedRegistry, SkipStore,
    UpdateController,
};
use updraft_engine::{
    DisabledEngine, FeedEngine, FeedEngineSettings, FeedSource, InstallReport, UpdateEngine,
};
use updraft_instance::{Acquisition, Activation, InstanceGate};
use updraft_presenter::{Dialog, DisplayState, UpdateNotifier};

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    about = "Updraft update daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print extended version information and exit"
    )]
    version: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the update controller until interrupted")]
    Run,
    #[command(about = "Query the release feed once and print the result")]
    Check {
        #[arg(long, help = "Print the release as JSON")]
        json: bool,
    },
    #[command(about = "Inspect or reset declined versions")]
    Skipped {
        #[command(subcommand)]
        action: SkippedAction,
    },
}

#[derive(Debug, Subcommand)]
enum SkippedAction {
    #[command(about = "List skipped versions")]
    List,
    #[command(about = "Forget every skipped version")]
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut version = VersionInfo::current();
    if cli.version {
        println!("{}", version.extended());
        return Ok(());
    }

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/updraft.toml"));

    let loaded = AppConfig::load_with_source(&candidates)?;
    let config = loaded.config;
    init_tracing("updraftd", &config.logging)?;
    info!(config_path = %loaded.source.display(), identity = %config.app.identity, "configuration loaded");

    if let Some(app_version) = &config.app.version {
        version = version.with_semver(app_version.clone());
    }
    let current = version
        .running_version()
        .with_context(|| format!("running version {:?} is not semver", version.semver))?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(config, current, version).await?,
        Commands::Check { json } => {
            let engine = build_engine(&config)?;
            let release = engine.check(&current).await?;
            render_check(&current, release.as_ref(), json)?;
        }
        Commands::Skipped { action } => {
            let store = SkipStore::from_config(&config.update);
            match action {
                SkippedAction::List => {
                    for skipped in store.load()? {
                        println!("{skipped}");
                    }
                }
                SkippedAction::Clear => {
                    store.clear()?;
                    info!("skipped versions cleared");
                }
            }
        }
    }

    Ok(())
}

async fn run_daemon(config: AppConfig, current: Version, version: VersionInfo) -> Result<()> {
    let gate = InstanceGate::from_config(&config);
    let mut lock = match gate.acquire().await? {
        Acquisition::Primary(lock) => lock,
        Acquisition::Secondary { acknowledged } => {
            info!(identity = %gate.identity(), acknowledged, "updraft already running; exiting");
            return Ok(());
        }
    };

    let engine = build_engine(&config)?;
    let registry = new_registry();
    let metrics = ControllerMetrics::new(registry.clone())?;
    let settings = ControllerSettings::from_config(&config.update, current);
    let skip_store = SkipStore::from_config(&config.update);

    let (endpoint, port) = updraft_bridge::channel();
    let notifier = UpdateNotifier::attach_with(port.clone(), render_state);
    let dispatcher = port.spawn_dispatcher()?;
    let handle = UpdateController::new(settings, engine, skip_store, Some(metrics)).spawn(endpoint);

    let shutdown = shutdown_signal()?;
    tokio::pin!(shutdown);
    info!(banner = %version.banner(), endpoint = %lock.endpoint(), "daemon running; waiting for termination signal");
    let restart = loop {
        tokio::select! {
            received = &mut shutdown => {
                info!(signal = received, "shutdown signal received; shutting down");
                break None;
            }
            report = handle.restart_requested() => break report,
            Some(activation) = lock.next_activation() => on_activate(&notifier, activation),
        }
    };

    let report = handle.shutdown().await;
    info!(phase = %report.final_phase, "update controller shut down");
    match &report.exit_install {
        Some(Ok(install)) => {
            info!(version = %install.version, target = %install.target.display(), "update installed on exit")
        }
        Some(Err(error)) => warn!(kind = %error.kind, error = %error.message, "install on exit failed"),
        None => {}
    }
    notifier.detach();
    dispatcher.abort();
    dump_metrics(&registry);
    drop(lock);

    if let Some(install) = restart {
        relaunch(&install)?;
    }
    Ok(())
}

/// Resolves with the name of the first shutdown signal. SIGTERM is
/// registered before returning so none is lost while the daemon starts.
#[cfg(unix)]
fn shutdown_signal() -> Result<impl Future<Output = &'static str>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    Ok(async move {
        tokio::select! {
            _ = ctrl_c() => "ctrl-c",
            _ = terminate.recv() => "terminate",
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> Result<impl Future<Output = &'static str>> {
    Ok(async {
        ctrl_c().await;
        "ctrl-c"
    })
}

async fn ctrl_c() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(?err, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
}

fn build_engine(config: &AppConfig) -> Result<Arc<dyn UpdateEngine>> {
    if !config.update.enabled {
        warn!("updates disabled by configuration; checks will be rejected");
        return Ok(Arc::new(DisabledEngine));
    }
    let source = FeedSource::parse(&config.update.feed)?;
    let install_target =
        std::env::current_exe().context("unable to resolve the running executable")?;
    let settings = FeedEngineSettings {
        source,
        cache_dir: config.update.resolved_cache_dir(&config.app.identity),
        install_target,
        allow_downgrade: config.update.allow_downgrade,
    };
    info!(feed = %settings.source, cache_dir = %settings.cache_dir.display(), "feed engine configured");
    Ok(Arc::new(FeedEngine::new(settings)?))
}

/// Host hook for a later launch: bring the window forward.
fn on_activate(notifier: &UpdateNotifier, activation: Activation) {
    let state = notifier.state();
    info!(
        pid = ?activation.pid,
        phase = %state.phase_view,
        status = %state.status_text,
        "activation requested by another launch"
    );
}

fn render_state(state: &DisplayState) {
    if state.phase_view == Phase::Downloading && state.progress_percent.is_some() {
        debug!(status = %state.status_text, bytes_per_second = ?state.bytes_per_second, "update progress");
        return;
    }
    let dialog = state.dialog.as_ref().map(|dialog| match dialog {
        Dialog::DownloadPrompt { .. } => "download_prompt",
        Dialog::ReadyToInstall { .. } => "ready_to_install",
    });
    info!(
        phase = %state.phase_view,
        status = %state.status_text,
        dialog = ?dialog,
        error = ?state.error_text,
        "update status"
    );
}

fn render_check(
    current: &Version,
    release: Option<&updraft_engine::ReleaseInfo>,
    json: bool,
) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&release)?);
        return Ok(());
    }
    match release {
        Some(release) => {
            info!(current = %current, latest = %release.version, "newer release detected");
            println!(
                "Current: {current}\nLatest: {}\nUpdate Available: true",
                release.version
            );
            if let Some(notes) = &release.notes {
                println!("Notes: {notes}");
            }
        }
        None => {
            info!(current = %current, "no updates found");
            println!("Current: {current}\nLatest: none");
        }
    }
    Ok(())
}

fn dump_metrics(registry: &SharedRegistry) {
    let mut buffer = Vec::new();
    if let Err(err) = TextEncoder::new().encode(&registry.gather(), &mut buffer) {
        debug!(error = %err, "failed to encode metrics");
        return;
    }
    debug!(metrics = %String::from_utf8_lossy(&buffer), "final update metrics");
}

fn relaunch(install: &InstallReport) -> Result<()> {
    let target: &Path = &install.target;
    let child = Command::new(target)
        .args(std::env::args_os().skip(1))
        .spawn()
        .with_context(|| format!("failed to relaunch {}", target.display()))?;
    info!(version = %install.version, pid = child.id(), "relaunched updated executable");
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn terminate_ends_the_daemon_wait() -> Result<()> {
        let shutdown = shutdown_signal()?;
        let status = Command::new("kill")
            .arg("-TERM")
            .arg(std::process::id().to_string())
            .status()?;
        assert!(status.success());
        let received = tokio::time::timeout(Duration::from_secs(5), shutdown).await?;
        assert_eq!(received, "terminate");
        Ok(())
    }
}
