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

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use updraft_bridge::{ErrorKind, Phase};

/// Shared registry type handed to the controller.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Prometheus instruments for the update controller.
#[derive(Clone)]
pub struct ControllerMetrics {
    registry: SharedRegistry,
    checks: IntCounter,
    transitions: IntCounterVec,
    failures: IntCounterVec,
    download_percent: IntGauge,
}

impl ControllerMetrics {
    pub fn new(registry: SharedRegistry) -> prometheus::Result<Self> {
        let checks = IntCounter::with_opts(Opts::new(
            "updraft_checks_total",
            "Number of update checks started",
        ))?;
        registry.register(Box::new(checks.clone()))?;

        let transitions = IntCounterVec::new(
            Opts::new(
                "updraft_transitions_total",
                "Phase transitions of the update session by target phase",
            ),
            &["phase"],
        )?;
        registry.register(Box::new(transitions.clone()))?;

        let failures = IntCounterVec::new(
            Opts::new(
                "updraft_engine_failures_total",
                "Update engine failures by error kind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(failures.clone()))?;

        let download_percent = IntGauge::with_opts(Opts::new(
            "updraft_download_percent",
            "Progress of the running download in percent",
        ))?;
        registry.register(Box::new(download_percent.clone()))?;

        Ok(Self {
            registry,
            checks,
            transitions,
            failures,
            download_percent,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn record_check(&self) {
        self.checks.inc();
    }

    pub fn record_transition(&self, phase: Phase) {
        self.transitions.with_label_values(&[phase.as_str()]).inc();
        if phase != Phase::Downloading {
            self.download_percent.set(0);
        }
    }

    pub fn record_failure(&self, kind: ErrorKind) {
        self.failures.with_label_values(&[kind.as_str()]).inc();
    }

    pub fn set_download_percent(&self, percent: u8) {
        self.download_percent.set(i64::from(percent));
    }
}

impl std::fmt::Debug for ControllerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerMetrics").finish_non_exhaustive()
    }
}
