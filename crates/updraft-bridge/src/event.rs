//! ---
//! upd_section: "02-bridge"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Capability-restricted channel pair between controller and presenters."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Candidate, ErrorDescriptor, Phase, ProgressSnapshot};

/// Subscription topics, one per event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    /// Free-form status line.
    Status,
    /// A release is on offer.
    Available,
    /// Download progress.
    Progress,
    /// Download verified.
    Downloaded,
    /// Engine failure.
    Error,
}

impl Topic {
    /// Every topic a full presenter listens to.
    pub const ALL: [Topic; 5] = [
        Topic::Status,
        Topic::Available,
        Topic::Progress,
        Topic::Downloaded,
        Topic::Error,
    ];

    /// Stable label.
    pub fn as_str(self) -> &'static str {
        match self {
            Topic::Status => "status",
            Topic::Available => "available",
            Topic::Progress => "progress",
            Topic::Downloaded => "downloaded",
            Topic::Error => "error",
        }
    }
}

/// Payload attached to an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    /// Status line for the new phase.
    Status {
        /// Display text.
        text: String,
    },
    /// Offered release.
    Available(Candidate),
    /// Transfer progress.
    Progress(ProgressSnapshot),
    /// Verified artifact version.
    Downloaded {
        /// Version ready to install.
        version: String,
    },
    /// Failure descriptor.
    Error(ErrorDescriptor),
}

impl EventPayload {
    /// Topic this payload is published on.
    pub fn topic(&self) -> Topic {
        match self {
            EventPayload::Status { .. } => Topic::Status,
            EventPayload::Available(_) => Topic::Available,
            EventPayload::Progress(_) => Topic::Progress,
            EventPayload::Downloaded { .. } => Topic::Downloaded,
            EventPayload::Error(_) => Topic::Error,
        }
    }

    /// Status payload helper.
    pub fn status(text: impl Into<String>) -> Self {
        EventPayload::Status { text: text.into() }
    }
}

/// Event envelope emitted by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateEvent {
    /// Strictly increasing per controller.
    pub seq: u64,
    /// Phase the session entered (or remained in) with this event.
    pub phase: Phase,
    /// Emission time.
    pub emitted_at: DateTime<Utc>,
    /// Attached payload.
    pub payload: EventPayload,
}

impl UpdateEvent {
    /// Wrap a payload.
    pub fn new(seq: u64, phase: Phase, payload: EventPayload) -> Self {
        Self {
            seq,
            phase,
            emitted_at: Utc::now(),
            payload,
        }
    }

    /// Topic of the payload.
    pub fn topic(&self) -> Topic {
        self.payload.topic()
    }
}
