//! ---
//! upd_section: "03-presenter"
//! upd_subsection: "tests"
//! upd_type: "source"
//! upd_scope: "test"
//! upd_description: "Notifier attach/detach and action tests against a bare endpoint."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
use updraft_bridge::{
    channel, status, Candidate, Dispatch, Envelope, ErrorDescriptor, ErrorKind, EventPayload,
    Phase, ProgressSnapshot, UserCommand,
};
use updraft_presenter::{Dialog, UpdateNotifier};

#[test]
fn listeners_are_released_on_detach_and_drop() {
    let (_endpoint, port) = channel();
    let notifier = UpdateNotifier::attach(port.clone());
    assert_eq!(port.listener_count(), 5);
    notifier.detach();
    assert_eq!(port.listener_count(), 0);

    {
        let _notifier = UpdateNotifier::attach(port.clone());
        assert_eq!(port.listener_count(), 5);
    }
    assert_eq!(port.listener_count(), 0);
}

#[test]
fn phase_view_follows_every_event() {
    let (mut endpoint, port) = channel();
    endpoint.attach();
    let notifier = UpdateNotifier::attach(port.clone());

    let script = vec![
        (Phase::Checking, EventPayload::status(status::CHECKING)),
        (
            Phase::Available,
            EventPayload::Available(Candidate::new("2.0.0")),
        ),
        (
            Phase::Downloading,
            EventPayload::status(status::downloading("2.0.0")),
        ),
        (
            Phase::Downloading,
            EventPayload::Progress(ProgressSnapshot::default().with_percent(60)),
        ),
        (
            Phase::Downloaded,
            EventPayload::Downloaded {
                version: "2.0.0".into(),
            },
        ),
        (
            Phase::Installing,
            EventPayload::status(status::installing("2.0.0")),
        ),
    ];
    for (phase, payload) in script {
        endpoint.emit(phase, payload);
        assert_eq!(port.dispatch_pending(), 1);
        assert_eq!(notifier.state().phase_view, phase);
    }
    let state = notifier.state();
    assert_eq!(state.status_text, "Installing update 2.0.0...");
    assert!(state.dialog.is_none());
}

#[test]
fn observer_sees_each_rendered_state() {
    let (mut endpoint, port) = channel();
    endpoint.attach();
    let seen = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _notifier = UpdateNotifier::attach_with(port.clone(), move |state| {
        sink.lock().push(state.status_text.clone())
    });

    endpoint.emit(Phase::Checking, EventPayload::status(status::CHECKING));
    endpoint.emit(Phase::Idle, EventPayload::status(status::UP_TO_DATE));
    port.dispatch_pending();
    assert_eq!(
        *seen.lock(),
        vec!["Checking for updates...".to_owned(), "You're up to date!".to_owned()]
    );
}

#[tokio::test]
async fn actions_only_send_commands() -> anyhow::Result<()> {
    let (mut endpoint, port) = channel();
    let notifier = UpdateNotifier::attach(port.clone());
    assert_eq!(notifier.check(), Dispatch::Dropped);

    endpoint.attach();
    endpoint.emit(
        Phase::Available,
        EventPayload::Available(Candidate::new("2.0.0").with_notes("notes")),
    );
    port.dispatch_pending();
    assert_eq!(
        notifier.state().dialog,
        Some(Dialog::DownloadPrompt {
            version: "2.0.0".into(),
            notes: Some("notes".into())
        })
    );

    assert_eq!(notifier.download(), Dispatch::Delivered);
    assert_eq!(notifier.skip(), Dispatch::Delivered);
    assert_eq!(notifier.install(), Dispatch::Delivered);

    let mut received = Vec::new();
    for _ in 0..3 {
        match endpoint.recv().await {
            Some(Envelope::Command(command)) => received.push(command),
            other => anyhow::bail!("unexpected envelope {other:?}"),
        }
    }
    assert_eq!(
        received,
        vec![
            UserCommand::Download,
            UserCommand::Skip {
                version: "2.0.0".into()
            },
            UserCommand::Install
        ]
    );
    assert_eq!(notifier.state().phase_view, Phase::Available);
    Ok(())
}

#[tokio::test]
async fn dismiss_and_later_are_local() -> anyhow::Result<()> {
    let (mut endpoint, port) = channel();
    endpoint.attach();
    let notifier = UpdateNotifier::attach(port.clone());

    endpoint.emit(
        Phase::Failed,
        EventPayload::Error(ErrorDescriptor::new(ErrorKind::Disabled, "dev mode")),
    );
    port.dispatch_pending();
    assert_eq!(notifier.state().error_text.as_deref(), Some("dev mode"));
    notifier.dismiss_error();
    let state = notifier.state();
    assert!(state.error_text.is_none());
    assert_eq!(state.phase_view, Phase::Failed);

    endpoint.emit(
        Phase::Downloaded,
        EventPayload::Downloaded {
            version: "2.0.0".into(),
        },
    );
    port.dispatch_pending();
    notifier.later();
    let state = notifier.state();
    assert!(state.dialog.is_none());
    assert_eq!(state.offered_version(), Some("2.0.0"));

    assert_eq!(notifier.skip(), Dispatch::Delivered);
    match endpoint.recv().await {
        Some(Envelope::Command(command)) => assert_eq!(
            command,
            UserCommand::Skip {
                version: "2.0.0".into()
            }
        ),
        other => anyhow::bail!("unexpected envelope {other:?}"),
    }

    endpoint.emit(Phase::Idle, EventPayload::status(status::UP_TO_DATE));
    port.dispatch_pending();
    assert!(notifier.state().offered_version().is_none());
    assert_eq!(notifier.skip(), Dispatch::Dropped);
    Ok(())
}
