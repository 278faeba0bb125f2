//! ---
//! upd_section: "03-presenter"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Presenter state derived from controller events."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;
use updraft_bridge::{Dispatch, PresenterPort, Subscription, Topic, UpdateEvent, UserCommand};

use crate::state::{reduce, DisplayState};

type Observer = Arc<dyn Fn(&DisplayState) + Send + Sync>;

/// Presenter attached to a bridge port.
///
/// Holds one subscription per topic; all of them are removed by
/// [`UpdateNotifier::detach`] or on drop.
pub struct UpdateNotifier {
    port: PresenterPort,
    state: Arc<Mutex<DisplayState>>,
    subscriptions: Vec<Subscription>,
}

impl UpdateNotifier {
    pub fn attach(port: PresenterPort) -> Self {
        Self::build(port, None)
    }

    /// Attach and call `observer` with the new state after every event.
    pub fn attach_with<F>(port: PresenterPort, observer: F) -> Self
    where
        F: Fn(&DisplayState) + Send + Sync + 'static,
    {
        Self::build(port, Some(Arc::new(observer)))
    }

    fn build(port: PresenterPort, observer: Option<Observer>) -> Self {
        let state = Arc::new(Mutex::new(DisplayState::default()));
        let subscriptions = Topic::ALL
            .into_iter()
            .map(|topic| {
                let state = Arc::clone(&state);
                let observer = observer.clone();
                port.subscribe(topic, move |event: &UpdateEvent| {
                    let rendered = {
                        let mut guard = state.lock();
                        reduce(&mut guard, event);
                        observer.as_ref().map(|_| guard.clone())
                    };
                    if let (Some(observer), Some(rendered)) = (&observer, rendered) {
                        observer(&rendered);
                    }
                })
            })
            .collect();
        debug!(topics = Topic::ALL.len(), "update notifier attached");
        Self {
            port,
            state,
            subscriptions,
        }
    }

    /// Copy of the current display state.
    pub fn state(&self) -> DisplayState {
        self.state.lock().clone()
    }

    pub fn port(&self) -> &PresenterPort {
        &self.port
    }

    pub fn check(&self) -> Dispatch {
        self.port.send(UserCommand::Check)
    }

    pub fn download(&self) -> Dispatch {
        self.port.send(UserCommand::Download)
    }

    pub fn install(&self) -> Dispatch {
        self.port.send(UserCommand::Install)
    }

    /// Decline the offered version, even after its dialog was hidden.
    pub fn skip(&self) -> Dispatch {
        let offered = self.state.lock().offered_version().map(str::to_owned);
        match offered {
            Some(version) => self.port.send(UserCommand::Skip { version }),
            None => {
                debug!("no offered version to skip");
                Dispatch::Dropped
            }
        }
    }

    /// Hide the error text. The controller stays in `Failed`.
    pub fn dismiss_error(&self) {
        let mut state = self.state.lock();
        state.error_text = None;
        state.status_text.clear();
    }

    /// Hide the download prompt or ready dialog. The offer stays skippable.
    pub fn later(&self) {
        self.state.lock().dialog = None;
    }

    pub async fn app_version(&self) -> updraft_bridge::Result<String> {
        self.port.app_version().await
    }

    /// Remove every subscription.
    pub fn detach(mut self) {
        self.unsubscribe_all();
    }

    fn unsubscribe_all(&mut self) {
        if self.subscriptions.is_empty() {
            return;
        }
        for subscription in self.subscriptions.drain(..) {
            subscription.unsubscribe();
        }
        debug!("update notifier detached");
    }
}

impl Drop for UpdateNotifier {
    fn drop(&mut self) {
        self.unsubscribe_all();
    }
}
