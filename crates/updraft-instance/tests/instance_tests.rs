//! ---
//! upd_section: "04-instance"
//! upd_subsection: "tests"
//! upd_type: "source"
//! upd_scope: "test"
//! upd_description: "Single-instance acquisition over a unix socket."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
#![cfg(unix)]

use std::time::Duration;

use tokio::time::timeout;
use updraft_instance::{Acquisition, InstanceGate};

const IDENTITY: &str = "dev.updraft.tests";

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_launch_signals_the_holder() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let gate = InstanceGate::new(IDENTITY, dir.path());

    let Acquisition::Primary(mut lock) = gate.acquire().await? else {
        anyhow::bail!("first launch must own the lock");
    };
    assert!(lock.endpoint().ends_with("dev.updraft.tests.sock"));

    match gate.acquire().await? {
        Acquisition::Secondary { acknowledged } => assert!(acknowledged),
        Acquisition::Primary(_) => anyhow::bail!("second launch must not own the lock"),
    }

    let activation = timeout(Duration::from_secs(2), lock.next_activation())
        .await?
        .expect("activation forwarded");
    assert_eq!(activation.pid, Some(std::process::id()));
    assert!(lock.try_activation().is_none());
    Ok(())
}

#[tokio::test]
async fn stale_socket_is_reclaimed() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let stale = dir.path().join(format!("{IDENTITY}.sock"));
    drop(std::os::unix::net::UnixListener::bind(&stale)?);
    assert!(stale.exists());

    let gate = InstanceGate::new(IDENTITY, dir.path());
    let acquisition = gate.acquire().await?;
    assert!(matches!(acquisition, Acquisition::Primary(_)));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_launches_over_a_stale_socket_elect_one_holder() -> anyhow::Result<()> {
    for round in 0..50 {
        let dir = tempfile::tempdir()?;
        let stale = dir.path().join(format!("{IDENTITY}.sock"));
        drop(std::os::unix::net::UnixListener::bind(&stale)?);

        let first = InstanceGate::new(IDENTITY, dir.path());
        let second = first.clone();
        let (a, b) = tokio::join!(
            tokio::spawn(async move { first.acquire().await }),
            tokio::spawn(async move { second.acquire().await }),
        );
        let outcomes = [a??, b??];
        let primaries = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, Acquisition::Primary(_)))
            .count();
        assert_eq!(primaries, 1, "round {round} elected {primaries} holders");
    }
    Ok(())
}

#[tokio::test]
async fn dropping_the_lock_frees_the_identity() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let gate = InstanceGate::new(IDENTITY, dir.path().join("run"));

    let first = gate.acquire().await?;
    assert!(matches!(first, Acquisition::Primary(_)));
    drop(first);
    assert!(!dir.path().join("run").join(format!("{IDENTITY}.sock")).exists());

    let again = gate.acquire().await?;
    assert!(matches!(again, Acquisition::Primary(_)));
    Ok(())
}

#[tokio::test]
async fn identities_do_not_collide() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let a = InstanceGate::new("dev.updraft.a", dir.path()).acquire().await?;
    let b = InstanceGate::new("dev.updraft.b", dir.path()).acquire().await?;
    assert!(matches!(a, Acquisition::Primary(_)));
    assert!(matches!(b, Acquisition::Primary(_)));
    Ok(())
}
