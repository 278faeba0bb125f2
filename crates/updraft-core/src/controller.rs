//! ---
//! upd_section: "01-core-functionality"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Update lifecycle controller and session state."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use semver::Version;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use updraft_bridge::{ControllerEndpoint, Envelope, ErrorDescriptor, EventPayload, Phase};
use updraft_common::UpdateConfig;
use updraft_engine::{InstallReport, ProgressSink, UpdateEngine};

use crate::exit_hook::{ExitHook, ShutdownReport};
use crate::machine::{self, Effect, Input, Policy};
use crate::metrics::ControllerMetrics;
use crate::session::{SessionSnapshot, UpdateSession};
use crate::skip_store::SkipStore;

/// Runtime settings of the controller.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub current_version: Version,
    pub auto_download: bool,
    pub install_on_quit: bool,
    pub poll_interval: Duration,
    /// Delay before the first automatic check; `None` skips it.
    pub initial_delay: Option<Duration>,
}

impl ControllerSettings {
    pub fn from_config(config: &UpdateConfig, current_version: Version) -> Self {
        Self {
            current_version,
            auto_download: config.auto_download,
            install_on_quit: config.install_on_quit,
            poll_interval: config.poll_interval,
            initial_delay: config.startup_delay(),
        }
    }
}

/// Owner of the update session. Consumed by [`UpdateController::spawn`].
pub struct UpdateController {
    settings: ControllerSettings,
    engine: Arc<dyn UpdateEngine>,
    skip_store: SkipStore,
    metrics: Option<ControllerMetrics>,
}

impl UpdateController {
    pub fn new(
        settings: ControllerSettings,
        engine: Arc<dyn UpdateEngine>,
        skip_store: SkipStore,
        metrics: Option<ControllerMetrics>,
    ) -> Self {
        Self {
            settings,
            engine,
            skip_store,
            metrics,
        }
    }

    /// Attach to the bridge and start the controller task.
    pub fn spawn(self, mut endpoint: ControllerEndpoint) -> ControllerHandle {
        let skipped = match self.skip_store.load() {
            Ok(skipped) => skipped,
            Err(err) => {
                warn!(error = %err, "ignoring unreadable skipped versions");
                Default::default()
            }
        };
        let session = UpdateSession::new(self.settings.current_version.clone(), skipped);
        let (snapshot_tx, snapshot_rx) = watch::channel(session.snapshot());
        let (restart_tx, restart_rx) = watch::channel(None);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        endpoint.attach();
        let actor = ControllerTask {
            policy: Policy {
                auto_download: self.settings.auto_download,
            },
            exit_hook: ExitHook::new(self.settings.install_on_quit),
            settings: self.settings,
            engine: self.engine,
            skip_store: self.skip_store,
            metrics: self.metrics,
            session,
            install_task: None,
            endpoint,
            snapshots: snapshot_tx,
            restart: restart_tx,
        };
        let task = tokio::spawn(actor.run(shutdown_rx));

        ControllerHandle {
            shutdown: shutdown_tx,
            snapshots: snapshot_rx,
            restart: restart_rx,
            task,
        }
    }
}

/// Lifecycle handle for a running controller.
#[derive(Debug)]
pub struct ControllerHandle {
    shutdown: broadcast::Sender<()>,
    snapshots: watch::Receiver<SessionSnapshot>,
    restart: watch::Receiver<Option<InstallReport>>,
    task: JoinHandle<ShutdownReport>,
}

impl ControllerHandle {
    /// Latest published copy of the session.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    /// Resolves once an explicit install succeeded; `None` if the controller stopped first.
    pub async fn restart_requested(&self) -> Option<InstallReport> {
        let mut restart = self.restart.clone();
        let guard = restart.wait_for(Option::is_some).await.ok()?;
        (*guard).clone()
    }

    /// Stop the task, run the exit hook and wait for both.
    pub async fn shutdown(self) -> ShutdownReport {
        let _ = self.shutdown.send(());
        match self.task.await {
            Ok(report) => report,
            Err(err) => {
                error!(error = %err, "update controller task join error");
                ShutdownReport {
                    final_phase: self.snapshots.borrow().phase,
                    exit_install: None,
                }
            }
        }
    }
}

struct ControllerTask {
    settings: ControllerSettings,
    policy: Policy,
    engine: Arc<dyn UpdateEngine>,
    skip_store: SkipStore,
    metrics: Option<ControllerMetrics>,
    exit_hook: ExitHook,
    session: UpdateSession,
    /// Running install. Kept apart from other engine work so shutdown waits for it.
    install_task: Option<JoinHandle<()>>,
    endpoint: ControllerEndpoint,
    snapshots: watch::Sender<SessionSnapshot>,
    restart: watch::Sender<Option<InstallReport>>,
}

impl ControllerTask {
    async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> ShutdownReport {
        let (notice_tx, mut notice_rx) = mpsc::unbounded_channel::<Input>();
        let mut inflight = JoinSet::new();

        let startup = sleep(self.settings.initial_delay.unwrap_or_default());
        tokio::pin!(startup);
        let mut startup_pending = self.settings.initial_delay.is_some();

        let period = self.settings.poll_interval.max(Duration::from_secs(1));
        let mut poll = interval_at(Instant::now() + period, period);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            version = %self.settings.current_version,
            engine = self.engine.name(),
            auto_download = self.settings.auto_download,
            install_on_quit = self.settings.install_on_quit,
            poll_interval_secs = period.as_secs(),
            "update controller started"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("update controller shutdown signal received");
                    break;
                }
                Some(envelope) = self.endpoint.recv() => match envelope {
                    Envelope::Command(command) => {
                        debug!(command = command.name(), phase = %self.session.phase(), "command received");
                        self.apply(Input::Command(command), &notice_tx, &mut inflight);
                    }
                    Envelope::AppVersion(reply) => {
                        let _ = reply.send(self.settings.current_version.to_string());
                    }
                },
                Some(notice) = notice_rx.recv() => {
                    self.apply(notice, &notice_tx, &mut inflight);
                }
                _ = &mut startup, if startup_pending => {
                    startup_pending = false;
                    debug!("startup update check due");
                    self.apply(Input::TimerFired, &notice_tx, &mut inflight);
                }
                _ = poll.tick() => {
                    debug!("periodic update check due");
                    self.apply(Input::TimerFired, &notice_tx, &mut inflight);
                }
                Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                    if let Err(err) = joined {
                        error!(error = %err, "update engine task failed");
                    }
                }
            }
        }

        self.endpoint.detach();
        if !inflight.is_empty() {
            debug!(tasks = inflight.len(), "abandoning in-flight engine work");
            inflight.abort_all();
        }
        let pending_install = match self.install_task.take() {
            Some(task) if self.session.phase() == Phase::Installing => {
                self.await_install(task, &mut notice_rx).await
            }
            _ => None,
        };
        self.finish(pending_install).await
    }

    /// Wait for an install that was still running when shutdown began and
    /// apply its result. `None` when its result was already applied.
    async fn await_install(
        &mut self,
        task: JoinHandle<()>,
        notices: &mut mpsc::UnboundedReceiver<Input>,
    ) -> Option<Result<InstallReport, ErrorDescriptor>> {
        if !task.is_finished() {
            info!("waiting for in-flight install before shutdown");
        }
        if let Err(err) = task.await {
            error!(error = %err, "update install task failed");
            return None;
        }
        while let Ok(notice) = notices.try_recv() {
            let Input::InstallFinished { outcome } = notice else {
                continue;
            };
            let step = machine::step(
                &mut self.session,
                &self.policy,
                Input::InstallFinished {
                    outcome: outcome.clone(),
                },
            );
            for (phase, payload) in step.events {
                self.publish(phase, payload);
            }
            return Some(outcome);
        }
        None
    }

    async fn finish(
        mut self,
        mut exit_install: Option<Result<InstallReport, ErrorDescriptor>>,
    ) -> ShutdownReport {
        if let Some((phase, payload)) = self.exit_hook.arm(&mut self.session) {
            self.publish(phase, payload);
            if let Some(done) = self
                .exit_hook
                .run(&mut self.session, self.engine.as_ref())
                .await
            {
                for (phase, payload) in done.events {
                    self.publish(phase, payload);
                }
                exit_install = Some(done.outcome);
            }
        }
        if let Some(Err(error)) = &exit_install {
            if let Some(metrics) = &self.metrics {
                metrics.record_failure(error.kind);
            }
        }
        self.snapshots.send_replace(self.session.snapshot());
        info!(phase = %self.session.phase(), "update controller stopped");
        ShutdownReport {
            final_phase: self.session.phase(),
            exit_install,
        }
    }

    fn apply(
        &mut self,
        input: Input,
        notices: &mpsc::UnboundedSender<Input>,
        inflight: &mut JoinSet<()>,
    ) {
        if let Some(metrics) = &self.metrics {
            if let Some(kind) = failure_kind(&input) {
                metrics.record_failure(kind);
            }
        }
        let label = input.label();
        let before = self.session.phase();
        let step = machine::step(&mut self.session, &self.policy, input);
        if step.is_noop() {
            return;
        }

        for (phase, payload) in step.events {
            self.publish(phase, payload);
        }
        let after = self.session.phase();
        if before != after {
            info!(from = %before, to = %after, input = label, "update phase changed");
        }

        for effect in step.effects {
            self.execute(effect, notices, inflight);
        }
        self.snapshots.send_replace(self.session.snapshot());
    }

    fn publish(&mut self, phase: Phase, payload: EventPayload) {
        if let Some(metrics) = &self.metrics {
            match &payload {
                EventPayload::Progress(progress) => metrics.set_download_percent(progress.percent),
                _ => metrics.record_transition(phase),
            }
        }
        let seq = self.endpoint.emit(phase, payload);
        debug!(seq, phase = %phase, "update event emitted");
    }

    fn execute(
        &mut self,
        effect: Effect,
        notices: &mpsc::UnboundedSender<Input>,
        inflight: &mut JoinSet<()>,
    ) {
        match effect {
            Effect::Check { run, current } => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_check();
                }
                let engine = Arc::clone(&self.engine);
                let tx = notices.clone();
                inflight.spawn(async move {
                    let outcome = engine.check(&current).await.map_err(|err| {
                        warn!(error = %err, "update check failed");
                        err.descriptor()
                    });
                    let _ = tx.send(Input::CheckResolved { run, outcome });
                });
            }
            Effect::Download { run, release } => {
                info!(version = %release.version, "downloading update");
                let engine = Arc::clone(&self.engine);
                let tx = notices.clone();
                let progress_tx = notices.clone();
                let sink = ProgressSink::new(move |snapshot| {
                    let _ = progress_tx.send(Input::Progress { run, snapshot });
                });
                inflight.spawn(async move {
                    let outcome = engine.download(&release, sink).await.map_err(|err| {
                        warn!(version = %release.version, error = %err, "update download failed");
                        err.descriptor()
                    });
                    let _ = tx.send(Input::DownloadFinished { run, outcome });
                });
            }
            Effect::Install { artifact, mode } => {
                info!(version = %artifact.version, mode = %mode, "installing update");
                let engine = Arc::clone(&self.engine);
                let tx = notices.clone();
                self.install_task = Some(tokio::spawn(async move {
                    let outcome = engine.install(&artifact, mode).await.map_err(|err| {
                        warn!(version = %artifact.version, error = %err, "update install failed");
                        err.descriptor()
                    });
                    let _ = tx.send(Input::InstallFinished { outcome });
                }));
            }
            Effect::PersistSkip { version } => {
                info!(version = %version, "update skipped");
                if let Err(err) = self.skip_store.save(self.session.skipped()) {
                    warn!(version = %version, error = %err, "failed to persist skipped version");
                }
            }
            Effect::RequestRestart(report) => {
                info!(version = %report.version, target = %report.target.display(), "restart requested after install");
                self.restart.send_replace(Some(report));
            }
        }
    }
}

fn failure_kind(input: &Input) -> Option<updraft_bridge::ErrorKind> {
    match input {
        Input::CheckResolved { outcome: Err(e), .. }
        | Input::DownloadFinished { outcome: Err(e), .. }
        | Input::InstallFinished { outcome: Err(e) } => Some(e.kind),
        _ => None,
    }
}
