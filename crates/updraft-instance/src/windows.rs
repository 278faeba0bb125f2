//! ---
//! upd_section: "04-instance"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Single-instance lock and activation relay."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
use std::io;
use std::time::Duration;

use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeServer, ServerOptions};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::protocol::{self, Activation};
use crate::{Acquisition, InstanceError, InstanceLock};

const ERROR_PIPE_BUSY: i32 = 231;
const CONNECT_ATTEMPTS: usize = 10;

pub(crate) async fn acquire(name: &str) -> Result<Acquisition, InstanceError> {
    let endpoint = format!(r"\\.\pipe\{name}");
    match ServerOptions::new()
        .first_pipe_instance(true)
        .create(&endpoint)
    {
        Ok(server) => {
            info!(endpoint = %endpoint, "instance lock acquired");
            let (tx, rx) = mpsc::unbounded_channel();
            let listener = tokio::spawn(accept_loop(endpoint.clone(), server, tx));
            Ok(Acquisition::Primary(InstanceLock {
                endpoint,
                activations: rx,
                listener,
            }))
        }
        Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
            let acknowledged = signal_holder(&endpoint)
                .await
                .map_err(|source| InstanceError::io(endpoint.clone(), source))?;
            info!(endpoint = %endpoint, acknowledged, "another instance is running");
            Ok(Acquisition::Secondary { acknowledged })
        }
        Err(err) => Err(InstanceError::io(endpoint, err)),
    }
}

async fn signal_holder(endpoint: &str) -> io::Result<bool> {
    let mut attempt = 0;
    let client = loop {
        match ClientOptions::new().open(endpoint) {
            Ok(client) => break client,
            Err(err) if err.raw_os_error() == Some(ERROR_PIPE_BUSY) && attempt < CONNECT_ATTEMPTS => {
                attempt += 1;
                sleep(Duration::from_millis(50)).await;
            }
            Err(err) => return Err(err),
        }
    };
    protocol::request_activation(client).await
}

async fn accept_loop(
    endpoint: String,
    mut server: NamedPipeServer,
    activations: mpsc::UnboundedSender<Activation>,
) {
    loop {
        if let Err(err) = server.connect().await {
            warn!(endpoint = %endpoint, error = %err, "instance pipe connect failed");
            return;
        }
        let next = match ServerOptions::new().create(&endpoint) {
            Ok(next) => next,
            Err(err) => {
                warn!(endpoint = %endpoint, error = %err, "instance pipe could not be re-created");
                return;
            }
        };
        let connected = std::mem::replace(&mut server, next);
        let activations = activations.clone();
        tokio::spawn(async move {
            if let Err(err) = protocol::serve(connected, &activations).await {
                debug!(error = %err, "instance request failed");
            }
        });
    }
}
