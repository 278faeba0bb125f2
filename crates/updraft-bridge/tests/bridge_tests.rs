//! ---
//! upd_section: "02-bridge"
//! upd_subsection: "tests"
//! upd_type: "source"
//! upd_scope: "test"
//! upd_description: "Ordering and subscription behaviour of the message bridge."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
use std::sync::Arc;

use parking_lot::Mutex;
use updraft_bridge::{
    channel, BridgeError, Candidate, EventPayload, Phase, ProgressSnapshot, Topic, UpdateEvent,
};

fn recorder(port: &updraft_bridge::PresenterPort) -> (Arc<Mutex<Vec<UpdateEvent>>>, Vec<updraft_bridge::Subscription>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let subs = Topic::ALL
        .into_iter()
        .map(|topic| {
            let sink = Arc::clone(&seen);
            port.subscribe(topic, move |event: &UpdateEvent| sink.lock().push(event.clone()))
        })
        .collect();
    (seen, subs)
}

#[test]
fn events_arrive_in_emission_order_with_increasing_sequence() {
    let (mut endpoint, port) = channel();
    let (seen, subs) = recorder(&port);

    endpoint.emit(Phase::Checking, EventPayload::status("Checking for updates..."));
    endpoint.emit(
        Phase::Available,
        EventPayload::Available(Candidate::new("2.0.0")),
    );
    for percent in [10u8, 30, 60, 100] {
        endpoint.emit(
            Phase::Downloading,
            EventPayload::Progress(ProgressSnapshot::default().with_percent(percent)),
        );
    }
    endpoint.emit(
        Phase::Downloaded,
        EventPayload::Downloaded {
            version: "2.0.0".into(),
        },
    );

    assert_eq!(port.dispatch_pending(), 7);
    let seen = seen.lock();
    let seqs: Vec<u64> = seen.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, vec![1, 2, 3, 4, 5, 6, 7]);
    let topics: Vec<Topic> = seen.iter().map(UpdateEvent::topic).collect();
    assert_eq!(
        topics,
        vec![
            Topic::Status,
            Topic::Available,
            Topic::Progress,
            Topic::Progress,
            Topic::Progress,
            Topic::Progress,
            Topic::Downloaded
        ]
    );
    drop(subs);
    assert_eq!(port.listener_count(), 0);
}

#[tokio::test]
async fn version_query_round_trips_through_attached_controller() -> anyhow::Result<()> {
    let (mut endpoint, port) = channel();
    assert_eq!(port.app_version().await, Err(BridgeError::Detached));

    endpoint.attach();
    let responder = tokio::spawn(async move {
        if let Some(updraft_bridge::Envelope::AppVersion(reply)) = endpoint.recv().await {
            let _ = reply.send("1.9.0".to_owned());
        }
        endpoint
    });

    assert_eq!(port.app_version().await?, "1.9.0");
    let _endpoint = responder.await?;
    Ok(())
}

#[tokio::test]
async fn background_dispatcher_delivers_events() {
    let (mut endpoint, port) = channel();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let _sub = port.subscribe(Topic::Error, move |event: &UpdateEvent| {
        let _ = tx.send(event.seq);
    });
    let dispatcher = port.spawn_dispatcher().expect("dispatcher");

    endpoint.emit(
        Phase::Failed,
        EventPayload::Error(updraft_bridge::ErrorDescriptor::new(
            updraft_bridge::ErrorKind::FeedUnreachable,
            "offline",
        )),
    );
    assert_eq!(rx.recv().await, Some(1));

    drop(endpoint);
    dispatcher.await.expect("dispatcher exits when controller is gone");
}
