//! ---
//! upd_section: "02-bridge"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Capability-restricted channel pair between controller and presenters."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! The bridge is the only surface a presenter sees: a fixed command set,
//! one version query and topic subscriptions over the ordered event stream.

pub mod channel;
pub mod command;
pub mod event;
pub mod hub;
pub mod status;
pub mod types;

/// Shared result type for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors surfaced to bridge callers.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BridgeError {
    /// No controller is attached to the command channel.
    #[error("update controller is not attached")]
    Detached,
    /// The event receiver was already handed to a dispatcher task.
    #[error("event dispatcher already running")]
    DispatcherRunning,
}

pub use channel::{channel, ControllerEndpoint, PresenterPort};
pub use command::{Dispatch, Envelope, UserCommand};
pub use event::{EventPayload, Topic, UpdateEvent};
pub use hub::{ListenerRegistry, Subscription};
pub use types::{Candidate, ErrorDescriptor, ErrorKind, Phase, ProgressSnapshot};
