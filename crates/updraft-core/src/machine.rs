//! ---
//! upd_section: "01-core-functionality"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Update lifecycle controller and session state."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
//! Pure transition function over [`UpdateSession`]. The controller feeds it
//! inputs and carries out the returned effects; nothing here performs IO.

use semver::Version;
use tracing::debug;
use updraft_bridge::{status, ErrorDescriptor, EventPayload, Phase, ProgressSnapshot, UserCommand};
use updraft_engine::{Artifact, InstallMode, InstallReport, ReleaseInfo};

use crate::session::UpdateSession;

/// Policy knobs consulted by the machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct Policy {
    /// Start downloading as soon as a release is available.
    pub auto_download: bool,
}

/// Everything that can move the session.
#[derive(Debug, Clone)]
pub enum Input {
    /// Presenter gesture.
    Command(UserCommand),
    /// Startup delay or polling interval elapsed.
    TimerFired,
    /// Engine check finished.
    CheckResolved {
        run: u64,
        outcome: Result<Option<ReleaseInfo>, ErrorDescriptor>,
    },
    /// Engine download progress.
    Progress {
        run: u64,
        snapshot: ProgressSnapshot,
    },
    /// Engine download finished.
    DownloadFinished {
        run: u64,
        outcome: Result<Artifact, ErrorDescriptor>,
    },
    /// Engine install finished.
    InstallFinished {
        outcome: Result<InstallReport, ErrorDescriptor>,
    },
}

impl Input {
    pub fn label(&self) -> &'static str {
        match self {
            Input::Command(command) => command.name(),
            Input::TimerFired => "timer",
            Input::CheckResolved { .. } => "check_resolved",
            Input::Progress { .. } => "progress",
            Input::DownloadFinished { .. } => "download_finished",
            Input::InstallFinished { .. } => "install_finished",
        }
    }
}

/// Work the controller must start after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Check { run: u64, current: Version },
    Download { run: u64, release: ReleaseInfo },
    Install { artifact: Artifact, mode: InstallMode },
    PersistSkip { version: String },
    RequestRestart(InstallReport),
}

/// Result of one transition.
#[derive(Debug, Default)]
pub struct Step {
    pub events: Vec<(Phase, EventPayload)>,
    pub effects: Vec<Effect>,
}

impl Step {
    fn ignored(reason: &'static str, phase: Phase) -> Self {
        debug!(phase = %phase, reason, "input ignored");
        Self::default()
    }

    fn emit(&mut self, phase: Phase, payload: EventPayload) {
        self.events.push((phase, payload));
    }

    pub fn is_noop(&self) -> bool {
        self.events.is_empty() && self.effects.is_empty()
    }
}

/// Apply `input` to `session`.
pub fn step(session: &mut UpdateSession, policy: &Policy, input: Input) -> Step {
    let phase = session.phase;
    match input {
        Input::Command(UserCommand::Check) => {
            if phase.is_busy() {
                return Step::ignored("check while busy", phase);
            }
            begin_check(session)
        }
        Input::TimerFired => match phase {
            Phase::Idle | Phase::Failed => begin_check(session),
            _ => Step::ignored("timer outside idle/failed", phase),
        },
        Input::CheckResolved { run, outcome } => {
            if phase != Phase::Checking || run != session.check_run {
                return Step::ignored("stale check result", phase);
            }
            resolve_check(session, policy, outcome)
        }
        Input::Command(UserCommand::Download) => {
            if phase != Phase::Available {
                return Step::ignored("download outside available", phase);
            }
            begin_download(session)
        }
        Input::Progress { run, snapshot } => {
            if phase != Phase::Downloading || run != session.download_run {
                return Step::ignored("stale progress", phase);
            }
            let previous = session.progress.map_or(0, |p| p.percent);
            let snapshot = snapshot.with_percent(snapshot.percent);
            if snapshot.percent < previous {
                return Step::ignored("regressing progress", phase);
            }
            session.progress = Some(snapshot);
            let mut step = Step::default();
            step.emit(Phase::Downloading, EventPayload::Progress(snapshot));
            step
        }
        Input::DownloadFinished { run, outcome } => {
            if phase != Phase::Downloading || run != session.download_run {
                return Step::ignored("stale download result", phase);
            }
            match outcome {
                Ok(artifact) => {
                    let version = artifact.version.to_string();
                    session.enter(Phase::Downloaded);
                    session.artifact = Some(artifact);
                    let mut step = Step::default();
                    step.emit(Phase::Downloaded, EventPayload::Downloaded { version });
                    step
                }
                Err(error) => fail(session, error),
            }
        }
        Input::Command(UserCommand::Install) => {
            if phase != Phase::Downloaded {
                return Step::ignored("install outside downloaded", phase);
            }
            let Some(artifact) = session.artifact.clone() else {
                return Step::ignored("downloaded without artifact", phase);
            };
            session.enter(Phase::Installing);
            let mut step = Step::default();
            step.emit(
                Phase::Installing,
                EventPayload::status(status::installing(&artifact.version.to_string())),
            );
            step.effects.push(Effect::Install {
                artifact,
                mode: InstallMode::RestartNow,
            });
            step
        }
        Input::InstallFinished { outcome } => {
            if phase != Phase::Installing {
                return Step::ignored("install result outside installing", phase);
            }
            match outcome {
                Ok(report) => Step {
                    events: Vec::new(),
                    effects: vec![Effect::RequestRestart(report)],
                },
                Err(error) => fail(session, error),
            }
        }
        Input::Command(UserCommand::Skip { version }) => {
            if !matches!(phase, Phase::Available | Phase::Downloaded) {
                return Step::ignored("skip outside available/downloaded", phase);
            }
            let offered = session
                .candidate
                .as_ref()
                .map(|c| c.version.to_string());
            if offered.as_deref() != Some(version.as_str()) {
                return Step::ignored("skip names a different version", phase);
            }
            session.skipped.insert(version.clone());
            session.enter(Phase::Idle);
            let mut step = Step::default();
            step.emit(Phase::Idle, EventPayload::status(status::skipped(&version)));
            step.effects.push(Effect::PersistSkip { version });
            step
        }
    }
}

fn begin_check(session: &mut UpdateSession) -> Step {
    session.check_run += 1;
    session.enter(Phase::Checking);
    let mut step = Step::default();
    step.emit(Phase::Checking, EventPayload::status(status::CHECKING));
    step.effects.push(Effect::Check {
        run: session.check_run,
        current: session.current_version.clone(),
    });
    step
}

fn resolve_check(
    session: &mut UpdateSession,
    policy: &Policy,
    outcome: Result<Option<ReleaseInfo>, ErrorDescriptor>,
) -> Step {
    let release = match outcome {
        Err(error) => return fail(session, error),
        Ok(None) => return up_to_date(session),
        Ok(Some(release)) if session.is_skipped(&release.version) => {
            debug!(version = %release.version, "release previously skipped");
            return up_to_date(session);
        }
        Ok(Some(release)) => release,
    };

    session.enter(Phase::Available);
    let candidate = release.candidate();
    session.candidate = Some(release);
    let mut step = Step::default();
    step.emit(Phase::Available, EventPayload::Available(candidate));
    if policy.auto_download {
        let mut download = begin_download(session);
        step.events.append(&mut download.events);
        step.effects.append(&mut download.effects);
    }
    step
}

fn up_to_date(session: &mut UpdateSession) -> Step {
    session.enter(Phase::Idle);
    let mut step = Step::default();
    step.emit(Phase::Idle, EventPayload::status(status::UP_TO_DATE));
    step
}

fn begin_download(session: &mut UpdateSession) -> Step {
    let Some(release) = session.candidate.clone() else {
        return Step::ignored("download without candidate", session.phase);
    };
    session.download_run += 1;
    session.enter(Phase::Downloading);
    session.progress = Some(ProgressSnapshot::default());
    let mut step = Step::default();
    step.emit(
        Phase::Downloading,
        EventPayload::status(status::downloading(&release.version.to_string())),
    );
    step.effects.push(Effect::Download {
        run: session.download_run,
        release,
    });
    step
}

pub(crate) fn fail(session: &mut UpdateSession, error: ErrorDescriptor) -> Step {
    session.enter(Phase::Failed);
    session.last_error = Some(error.clone());
    let mut step = Step::default();
    step.emit(Phase::Failed, EventPayload::Error(error));
    step
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use updraft_bridge::{ErrorKind, Topic};

    fn session() -> UpdateSession {
        UpdateSession::new(Version::new(1, 9, 0), BTreeSet::new())
    }

    fn release(version: &str) -> ReleaseInfo {
        ReleaseInfo::new(Version::parse(version).expect("version"))
    }

    fn artifact(version: &str) -> Artifact {
        Artifact {
            version: Version::parse(version).expect("version"),
            path: "cache/app".into(),
            size: 1,
            sha256: String::new(),
        }
    }

    fn topics(step: &Step) -> Vec<(Phase, Topic)> {
        step.events.iter().map(|(p, e)| (*p, e.topic())).collect()
    }

    fn drive_to_available(session: &mut UpdateSession) {
        let policy = Policy::default();
        step(session, &policy, Input::Command(UserCommand::Check));
        let run = session.check_run;
        step(
            session,
            &policy,
            Input::CheckResolved {
                run,
                outcome: Ok(Some(release("2.0.0"))),
            },
        );
        assert_eq!(session.phase(), Phase::Available);
    }

    fn drive_to_downloaded(session: &mut UpdateSession) {
        let policy = Policy::default();
        drive_to_available(session);
        step(session, &policy, Input::Command(UserCommand::Download));
        let run = session.download_run;
        step(
            session,
            &policy,
            Input::DownloadFinished {
                run,
                outcome: Ok(artifact("2.0.0")),
            },
        );
        assert_eq!(session.phase(), Phase::Downloaded);
    }

    #[test]
    fn check_emits_status_then_available() {
        let mut s = session();
        let policy = Policy::default();
        let first = step(&mut s, &policy, Input::Command(UserCommand::Check));
        assert_eq!(topics(&first), vec![(Phase::Checking, Topic::Status)]);
        assert!(matches!(first.effects[..], [Effect::Check { run: 1, .. }]));

        let second = step(
            &mut s,
            &policy,
            Input::CheckResolved {
                run: 1,
                outcome: Ok(Some(release("2.0.0"))),
            },
        );
        assert_eq!(topics(&second), vec![(Phase::Available, Topic::Available)]);
        assert!(second.effects.is_empty());
    }

    #[test]
    fn auto_download_emits_available_then_downloading_status() {
        let mut s = session();
        let policy = Policy { auto_download: true };
        step(&mut s, &policy, Input::TimerFired);
        let resolved = step(
            &mut s,
            &policy,
            Input::CheckResolved {
                run: 1,
                outcome: Ok(Some(release("2.0.0"))),
            },
        );
        assert_eq!(
            topics(&resolved),
            vec![
                (Phase::Available, Topic::Available),
                (Phase::Downloading, Topic::Status)
            ]
        );
        assert!(matches!(resolved.effects[..], [Effect::Download { run: 1, .. }]));
        assert_eq!(s.progress().map(|p| p.percent), Some(0));
    }

    #[test]
    fn busy_phases_ignore_checks() {
        let mut s = session();
        let policy = Policy::default();
        drive_to_available(&mut s);
        step(&mut s, &policy, Input::Command(UserCommand::Download));
        for input in [Input::Command(UserCommand::Check), Input::TimerFired] {
            let ignored = step(&mut s, &policy, input);
            assert!(ignored.is_noop());
            assert_eq!(s.phase(), Phase::Downloading);
        }
    }

    #[test]
    fn timer_does_not_interrupt_a_pending_offer() {
        let mut s = session();
        drive_to_available(&mut s);
        assert!(step(&mut s, &Policy::default(), Input::TimerFired).is_noop());
        assert_eq!(s.phase(), Phase::Available);
    }

    #[test]
    fn manual_check_from_available_discards_candidate() {
        let mut s = session();
        drive_to_available(&mut s);
        let restarted = step(&mut s, &Policy::default(), Input::Command(UserCommand::Check));
        assert_eq!(topics(&restarted), vec![(Phase::Checking, Topic::Status)]);
        assert!(s.candidate().is_none());
    }

    #[test]
    fn progress_is_monotonic_and_resets_per_run() {
        let mut s = session();
        let policy = Policy::default();
        drive_to_available(&mut s);
        step(&mut s, &policy, Input::Command(UserCommand::Download));
        let run = s.download_run;
        let report = |percent| Input::Progress {
            run,
            snapshot: ProgressSnapshot::default().with_percent(percent),
        };
        assert_eq!(step(&mut s, &policy, report(40)).events.len(), 1);
        assert!(step(&mut s, &policy, report(20)).is_noop());
        assert_eq!(s.progress().map(|p| p.percent), Some(40));
        assert!(step(&mut s, &policy, Input::Progress {
            run: run + 7,
            snapshot: ProgressSnapshot::default().with_percent(90),
        })
        .is_noop());

        step(
            &mut s,
            &policy,
            Input::DownloadFinished {
                run,
                outcome: Err(ErrorDescriptor::new(ErrorKind::FeedUnreachable, "reset")),
            },
        );
        assert!(s.progress().is_none());
        drive_to_available(&mut s);
        step(&mut s, &policy, Input::Command(UserCommand::Download));
        assert_eq!(s.progress().map(|p| p.percent), Some(0));
    }

    #[test]
    fn commands_outside_precondition_are_silent() {
        let mut s = session();
        let policy = Policy::default();
        for command in [
            UserCommand::Download,
            UserCommand::Install,
            UserCommand::Skip {
                version: "2.0.0".into(),
            },
        ] {
            assert!(step(&mut s, &policy, Input::Command(command)).is_noop());
            assert_eq!(s.phase(), Phase::Idle);
        }
    }

    #[test]
    fn skipped_version_is_not_offered_again() {
        let mut s = session();
        let policy = Policy::default();
        drive_to_available(&mut s);
        let skipped = step(
            &mut s,
            &policy,
            Input::Command(UserCommand::Skip {
                version: "2.0.0".into(),
            }),
        );
        assert_eq!(topics(&skipped), vec![(Phase::Idle, Topic::Status)]);
        assert_eq!(
            skipped.effects,
            vec![Effect::PersistSkip {
                version: "2.0.0".into()
            }]
        );

        step(&mut s, &policy, Input::Command(UserCommand::Check));
        let run = s.check_run;
        let again = step(
            &mut s,
            &policy,
            Input::CheckResolved {
                run,
                outcome: Ok(Some(release("2.0.0"))),
            },
        );
        assert_eq!(s.phase(), Phase::Idle);
        assert_eq!(topics(&again), vec![(Phase::Idle, Topic::Status)]);
    }

    #[test]
    fn skip_for_other_version_is_ignored() {
        let mut s = session();
        drive_to_available(&mut s);
        let ignored = step(
            &mut s,
            &Policy::default(),
            Input::Command(UserCommand::Skip {
                version: "3.0.0".into(),
            }),
        );
        assert!(ignored.is_noop());
        assert_eq!(s.phase(), Phase::Available);
    }

    #[test]
    fn install_success_requests_restart_without_events() {
        let mut s = session();
        let policy = Policy::default();
        drive_to_downloaded(&mut s);
        let started = step(&mut s, &policy, Input::Command(UserCommand::Install));
        assert_eq!(topics(&started), vec![(Phase::Installing, Topic::Status)]);

        let report = InstallReport {
            version: Version::new(2, 0, 0),
            target: "app".into(),
            mode: InstallMode::RestartNow,
            restart_required: true,
        };
        let done = step(
            &mut s,
            &policy,
            Input::InstallFinished {
                outcome: Ok(report.clone()),
            },
        );
        assert!(done.events.is_empty());
        assert_eq!(done.effects, vec![Effect::RequestRestart(report)]);
        assert_eq!(s.phase(), Phase::Installing);
    }

    #[test]
    fn failure_then_check_clears_error() {
        let mut s = session();
        let policy = Policy::default();
        step(&mut s, &policy, Input::Command(UserCommand::Check));
        let failed = step(
            &mut s,
            &policy,
            Input::CheckResolved {
                run: 1,
                outcome: Err(ErrorDescriptor::new(ErrorKind::FeedUnreachable, "offline")),
            },
        );
        assert_eq!(topics(&failed), vec![(Phase::Failed, Topic::Error)]);
        assert!(s.last_error().is_some());

        step(&mut s, &policy, Input::Command(UserCommand::Check));
        assert_eq!(s.phase(), Phase::Checking);
        assert!(s.last_error().is_none());
    }
}
