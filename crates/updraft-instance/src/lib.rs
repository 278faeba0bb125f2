//! ---
//! upd_section: "04-instance"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Single-instance lock and activation relay."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
//! One process per user and application identity.
//!
//! The first launch binds a local endpoint (a unix socket under the runtime
//! directory, or a named pipe on Windows) and keeps it for its lifetime.
//! Later launches connect, ask the holder to activate and exit. On unix an
//! advisory lock on `<name>.lock` decides ownership, so a stale socket file
//! is only ever reclaimed by the launch that won the lock.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use updraft_common::AppConfig;

mod protocol;
#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

pub use protocol::Activation;

#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("application identity {0:?} cannot name an instance lock")]
    InvalidIdentity(String),
    #[error("instance endpoint {endpoint}: {source}")]
    Io {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
}

impl InstanceError {
    pub(crate) fn io(endpoint: impl Into<String>, source: std::io::Error) -> Self {
        InstanceError::Io {
            endpoint: endpoint.into(),
            source,
        }
    }
}

/// Outcome of [`InstanceGate::acquire`].
#[derive(Debug)]
pub enum Acquisition {
    /// This process owns the lock.
    Primary(InstanceLock),
    /// Another process owns it and was asked to activate.
    Secondary {
        /// Whether the holder confirmed the request.
        acknowledged: bool,
    },
}

/// Names the lock for one application identity.
#[derive(Debug, Clone)]
pub struct InstanceGate {
    identity: String,
    runtime_dir: PathBuf,
}

impl InstanceGate {
    pub fn new(identity: impl Into<String>, runtime_dir: impl Into<PathBuf>) -> Self {
        Self {
            identity: identity.into(),
            runtime_dir: runtime_dir.into(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.app.identity.clone(),
            config.instance.resolved_runtime_dir(),
        )
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn runtime_dir(&self) -> &Path {
        &self.runtime_dir
    }

    /// Identity reduced to characters safe for file and pipe names.
    pub fn endpoint_name(&self) -> Result<String, InstanceError> {
        let name: String = self
            .identity
            .trim()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if name.is_empty() || name.chars().all(|c| c == '.') {
            return Err(InstanceError::InvalidIdentity(self.identity.clone()));
        }
        Ok(name)
    }

    /// Take the lock or signal its holder.
    pub async fn acquire(&self) -> Result<Acquisition, InstanceError> {
        let name = self.endpoint_name()?;
        #[cfg(unix)]
        {
            unix::acquire(&self.runtime_dir, &name).await
        }
        #[cfg(windows)]
        {
            windows::acquire(&name).await
        }
    }
}

/// Held lock. Dropping it releases the endpoint.
#[derive(Debug)]
pub struct InstanceLock {
    endpoint: String,
    #[cfg(unix)]
    socket_path: PathBuf,
    /// Holds the advisory lock until after the socket is removed.
    #[cfg(unix)]
    _lock_file: std::fs::File,
    activations: mpsc::UnboundedReceiver<Activation>,
    listener: JoinHandle<()>,
}

impl InstanceLock {
    /// Socket path or pipe name other launches connect to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Next activation request from a later launch.
    pub async fn next_activation(&mut self) -> Option<Activation> {
        self.activations.recv().await
    }

    /// Activation already received, without waiting.
    pub fn try_activation(&mut self) -> Option<Activation> {
        self.activations.try_recv().ok()
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        self.listener.abort();
        #[cfg(unix)]
        {
            if let Err(err) = std::fs::remove_file(&self.socket_path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    debug!(endpoint = %self.endpoint, error = %err, "failed to remove instance socket");
                }
            }
        }
        debug!(endpoint = %self.endpoint, "instance lock released");
    }
}
