//! ---
//! upd_section: "03-engine"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Update engine capability and bundled implementations."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
use std::path::PathBuf;

use updraft_bridge::{ErrorDescriptor, ErrorKind};

/// Failures raised by update engines.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The feed could not be fetched.
    #[error("update feed {feed} unreachable: {reason}")]
    FeedUnreachable {
        /// Feed location.
        feed: String,
        /// Underlying cause.
        reason: String,
    },
    /// The feed was fetched but could not be parsed.
    #[error("update feed {feed} is malformed: {reason}")]
    MalformedFeed {
        /// Feed location.
        feed: String,
        /// Parser message.
        reason: String,
    },
    /// The artifact transfer broke off.
    #[error("artifact download failed: {0}")]
    Transfer(String),
    /// Checksum or size mismatch.
    #[error("artifact verification failed: {0}")]
    Verification(String),
    /// Swapping the installed binary failed.
    #[error("install failed for {}: {reason}", .path.display())]
    InstallFailed {
        /// Path being replaced.
        path: PathBuf,
        /// Underlying cause.
        reason: String,
    },
    /// The process may not write to the installation.
    #[error("permission denied writing {}", .path.display())]
    PermissionDenied {
        /// Path that rejected the write.
        path: PathBuf,
    },
    /// Updates are switched off for this build.
    #[error("{0}")]
    Disabled(String),
    /// An error already classified elsewhere.
    #[error("{}", .0.message)]
    Reported(ErrorDescriptor),
    /// Unclassified IO failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Taxonomy bucket for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::FeedUnreachable { .. } | EngineError::Transfer(_) => {
                ErrorKind::FeedUnreachable
            }
            EngineError::Verification(_) => ErrorKind::VerificationFailed,
            EngineError::InstallFailed { .. } => ErrorKind::InstallFailed,
            EngineError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            EngineError::Disabled(_) => ErrorKind::Disabled,
            EngineError::Reported(descriptor) => descriptor.kind,
            EngineError::MalformedFeed { .. } | EngineError::Io(_) => ErrorKind::Other,
        }
    }

    /// Convert once into the descriptor carried by events.
    pub fn descriptor(&self) -> ErrorDescriptor {
        match self {
            EngineError::Reported(descriptor) => descriptor.clone(),
            other => ErrorDescriptor::new(other.kind(), other.to_string()),
        }
    }

    /// Map an IO error raised while touching `path` during install.
    pub fn from_install_io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        let path = path.into();
        if err.kind() == std::io::ErrorKind::PermissionDenied {
            EngineError::PermissionDenied { path }
        } else {
            EngineError::InstallFailed {
                path,
                reason: err.to_string(),
            }
        }
    }
}

impl From<ErrorDescriptor> for EngineError {
    fn from(descriptor: ErrorDescriptor) -> Self {
        EngineError::Reported(descriptor)
    }
}
