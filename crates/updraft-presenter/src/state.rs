//! ---
//! upd_section: "03-presenter"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Presenter state derived from controller events."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
use serde::Serialize;
use updraft_bridge::{status, EventPayload, Phase, UpdateEvent};

/// Modal the host should show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "dialog", rename_all = "snake_case")]
pub enum Dialog {
    /// Offer to download a release.
    DownloadPrompt {
        version: String,
        notes: Option<String>,
    },
    /// Offer to install and restart.
    ReadyToInstall { version: String },
}

impl Dialog {
    pub fn version(&self) -> &str {
        match self {
            Dialog::DownloadPrompt { version, .. } | Dialog::ReadyToInstall { version } => version,
        }
    }
}

/// Everything a window needs to render the update area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayState {
    pub status_text: String,
    pub progress_percent: Option<u8>,
    pub bytes_per_second: Option<u64>,
    pub dialog: Option<Dialog>,
    /// Release the controller is offering. Survives hiding the dialog.
    pub offered_version: Option<String>,
    pub error_text: Option<String>,
    pub phase_view: Phase,
    /// Sequence number of the last event folded in.
    pub last_seq: u64,
}

impl Default for DisplayState {
    fn default() -> Self {
        Self {
            status_text: String::new(),
            progress_percent: None,
            bytes_per_second: None,
            dialog: None,
            offered_version: None,
            error_text: None,
            phase_view: Phase::Idle,
            last_seq: 0,
        }
    }
}

impl DisplayState {
    /// Version the controller offers, whether or not its dialog is visible.
    pub fn offered_version(&self) -> Option<&str> {
        self.offered_version.as_deref()
    }
}

/// Fold one event into the display state.
pub fn reduce(state: &mut DisplayState, event: &UpdateEvent) {
    state.phase_view = event.phase;
    state.last_seq = event.seq;

    match &event.payload {
        EventPayload::Status { text } => {
            state.status_text.clone_from(text);
            match event.phase {
                Phase::Checking => {
                    state.error_text = None;
                    clear_offer(state);
                    clear_progress(state);
                }
                Phase::Downloading => {
                    clear_offer(state);
                    state.progress_percent.get_or_insert(0);
                }
                Phase::Idle | Phase::Installing => {
                    clear_offer(state);
                    clear_progress(state);
                }
                Phase::Available | Phase::Downloaded | Phase::Failed => {}
            }
        }
        EventPayload::Available(candidate) => {
            state.status_text = status::available(&candidate.version);
            state.error_text = None;
            state.offered_version = Some(candidate.version.clone());
            state.dialog = Some(Dialog::DownloadPrompt {
                version: candidate.version.clone(),
                notes: candidate.notes.clone(),
            });
        }
        EventPayload::Progress(progress) => {
            state.status_text = status::progress(progress.percent);
            state.progress_percent = Some(progress.percent);
            state.bytes_per_second = Some(progress.bytes_per_second);
        }
        EventPayload::Downloaded { version } => {
            state.status_text = status::ready(version);
            clear_progress(state);
            state.offered_version = Some(version.clone());
            state.dialog = Some(Dialog::ReadyToInstall {
                version: version.clone(),
            });
        }
        EventPayload::Error(error) => {
            state.status_text = status::error(&error.message);
            state.error_text = Some(error.message.clone());
            clear_offer(state);
            clear_progress(state);
        }
    }
}

fn clear_offer(state: &mut DisplayState) {
    state.dialog = None;
    state.offered_version = None;
}

fn clear_progress(state: &mut DisplayState) {
    state.progress_percent = None;
    state.bytes_per_second = None;
}

#[cfg(test)]
mod tests {
    use updraft_bridge::{Candidate, ErrorDescriptor, ErrorKind, ProgressSnapshot};

    use super::*;

    fn event(seq: u64, phase: Phase, payload: EventPayload) -> UpdateEvent {
        UpdateEvent::new(seq, phase, payload)
    }

    #[test]
    fn offer_download_and_ready_flow() {
        let mut state = DisplayState::default();
        reduce(
            &mut state,
            &event(1, Phase::Checking, EventPayload::status(status::CHECKING)),
        );
        assert_eq!(state.status_text, "Checking for updates...");

        reduce(
            &mut state,
            &event(
                2,
                Phase::Available,
                EventPayload::Available(Candidate::new("2.0.0").with_notes("Faster sync")),
            ),
        );
        assert_eq!(
            state.dialog,
            Some(Dialog::DownloadPrompt {
                version: "2.0.0".into(),
                notes: Some("Faster sync".into())
            })
        );

        reduce(
            &mut state,
            &event(
                3,
                Phase::Downloading,
                EventPayload::status(status::downloading("2.0.0")),
            ),
        );
        assert_eq!(state.progress_percent, Some(0));
        assert!(state.dialog.is_none());
        assert!(state.offered_version().is_none());

        reduce(
            &mut state,
            &event(
                4,
                Phase::Downloading,
                EventPayload::Progress(ProgressSnapshot::from_counts(30, 100, 2048)),
            ),
        );
        assert_eq!(state.status_text, "Downloading 30%");
        assert_eq!(state.progress_percent, Some(30));
        assert_eq!(state.bytes_per_second, Some(2048));

        reduce(
            &mut state,
            &event(
                5,
                Phase::Downloaded,
                EventPayload::Downloaded {
                    version: "2.0.0".into(),
                },
            ),
        );
        assert_eq!(state.status_text, "Update 2.0.0 ready to install");
        assert_eq!(state.progress_percent, None);
        assert_eq!(state.offered_version(), Some("2.0.0"));
        assert_eq!(state.phase_view, Phase::Downloaded);
        assert_eq!(state.last_seq, 5);
    }

    #[test]
    fn error_then_check_clears_error_text() {
        let mut state = DisplayState::default();
        reduce(
            &mut state,
            &event(
                1,
                Phase::Failed,
                EventPayload::Error(ErrorDescriptor::new(ErrorKind::FeedUnreachable, "offline")),
            ),
        );
        assert_eq!(state.error_text.as_deref(), Some("offline"));
        assert_eq!(state.status_text, "Update error: offline");

        reduce(
            &mut state,
            &event(2, Phase::Checking, EventPayload::status(status::CHECKING)),
        );
        assert!(state.error_text.is_none());
        assert_eq!(state.phase_view, Phase::Checking);
    }
}
