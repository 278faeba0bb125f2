//! ---
//! upd_section: "04-instance"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Single-instance lock and activation relay."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::time::Duration;

use rustix::fs::{flock, FlockOperation};
use rustix::io::Errno;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::protocol::{self, Activation};
use crate::{Acquisition, InstanceError, InstanceLock};

/// How long a later launch waits for the lock holder to start listening.
const BIND_GRACE: Duration = Duration::from_secs(2);
const CONNECT_RETRY: Duration = Duration::from_millis(20);

pub(crate) async fn acquire(runtime_dir: &Path, name: &str) -> Result<Acquisition, InstanceError> {
    let socket_path = runtime_dir.join(format!("{name}.sock"));
    let lock_path = runtime_dir.join(format!("{name}.lock"));
    let endpoint = socket_path.display().to_string();
    std::fs::create_dir_all(runtime_dir)
        .map_err(|source| InstanceError::io(runtime_dir.display().to_string(), source))?;

    // The socket file is only unlinked or bound by whoever holds the lock file.
    let Some(lock_file) = lock_exclusive(&lock_path)? else {
        return signal_holder(&socket_path, &endpoint).await;
    };

    match std::fs::remove_file(&socket_path) {
        Ok(()) => warn!(endpoint = %endpoint, "removed stale instance socket"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(InstanceError::io(endpoint, err)),
    }
    let listener =
        UnixListener::bind(&socket_path).map_err(|source| InstanceError::io(&endpoint, source))?;
    restrict_to_owner(&socket_path);
    info!(endpoint = %endpoint, "instance lock acquired");

    let (tx, rx) = mpsc::unbounded_channel();
    let listener = tokio::spawn(accept_loop(listener, tx));
    Ok(Acquisition::Primary(InstanceLock {
        endpoint,
        socket_path,
        _lock_file: lock_file,
        activations: rx,
        listener,
    }))
}

/// Open the lock file and take an exclusive advisory lock without blocking.
/// `None` means another launch holds it.
fn lock_exclusive(lock_path: &Path) -> Result<Option<File>, InstanceError> {
    let lock_err = |source: io::Error| InstanceError::io(lock_path.display().to_string(), source);
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)
        .map_err(lock_err)?;
    restrict_to_owner(lock_path);
    match flock(&file, FlockOperation::NonBlockingLockExclusive) {
        Ok(()) => Ok(Some(file)),
        Err(errno) if errno == Errno::WOULDBLOCK => {
            debug!(path = %lock_path.display(), "instance lock held elsewhere");
            Ok(None)
        }
        Err(errno) => Err(lock_err(io::Error::from(errno))),
    }
}

/// Ask the lock holder to activate. The holder may still be binding its
/// socket, so missing or refusing endpoints are retried for a short while.
async fn signal_holder(socket_path: &Path, endpoint: &str) -> Result<Acquisition, InstanceError> {
    let deadline = Instant::now() + BIND_GRACE;
    loop {
        match UnixStream::connect(socket_path).await {
            Ok(stream) => {
                let acknowledged = protocol::request_activation(stream)
                    .await
                    .map_err(|source| InstanceError::io(endpoint, source))?;
                info!(endpoint = %endpoint, acknowledged, "another instance is running");
                return Ok(Acquisition::Secondary { acknowledged });
            }
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
                ) =>
            {
                if Instant::now() >= deadline {
                    warn!(endpoint = %endpoint, error = %err, "instance holder never answered");
                    return Ok(Acquisition::Secondary {
                        acknowledged: false,
                    });
                }
                sleep(CONNECT_RETRY).await;
            }
            Err(err) => return Err(InstanceError::io(endpoint, err)),
        }
    }
}

async fn accept_loop(listener: UnixListener, activations: mpsc::UnboundedSender<Activation>) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let activations = activations.clone();
                tokio::spawn(async move {
                    if let Err(err) = protocol::serve(stream, &activations).await {
                        debug!(error = %err, "instance request failed");
                    }
                });
            }
            Err(err) => {
                warn!(error = %err, "instance socket accept failed");
                return;
            }
        }
    }
}

fn restrict_to_owner(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(err) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
        debug!(path = %path.display(), error = %err, "could not restrict instance file");
    }
}
