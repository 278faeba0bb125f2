//! ---
//! upd_section: "02-bridge"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Capability-restricted channel pair between controller and presenters."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::command::{Dispatch, Envelope, UserCommand};
use crate::event::{EventPayload, Topic, UpdateEvent};
use crate::hub::{ListenerRegistry, Subscription};
use crate::types::Phase;
use crate::{BridgeError, Result};

/// Depth of the command queue between presenters and the controller.
pub const COMMAND_CAPACITY: usize = 32;

struct Shared {
    attached: AtomicBool,
    listeners: Arc<ListenerRegistry>,
    events: Mutex<Option<mpsc::UnboundedReceiver<UpdateEvent>>>,
}

/// Create a connected endpoint pair. The controller side starts detached.
pub fn channel() -> (ControllerEndpoint, PresenterPort) {
    let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        attached: AtomicBool::new(false),
        listeners: Arc::new(ListenerRegistry::new()),
        events: Mutex::new(Some(event_rx)),
    });
    let endpoint = ControllerEndpoint {
        commands: command_rx,
        events: event_tx,
        shared: Arc::clone(&shared),
        next_seq: 1,
    };
    let port = PresenterPort {
        commands: command_tx,
        shared,
    };
    (endpoint, port)
}

/// Controller half: receives commands and emits ordered events.
pub struct ControllerEndpoint {
    commands: mpsc::Receiver<Envelope>,
    events: mpsc::UnboundedSender<UpdateEvent>,
    shared: Arc<Shared>,
    next_seq: u64,
}

impl ControllerEndpoint {
    /// Start accepting commands. Anything sent earlier was already dropped.
    pub fn attach(&mut self) {
        self.shared.attached.store(true, Ordering::SeqCst);
        debug!("controller attached to bridge");
    }

    /// Stop accepting commands.
    pub fn detach(&mut self) {
        if self.shared.attached.swap(false, Ordering::SeqCst) {
            debug!("controller detached from bridge");
        }
    }

    /// Whether commands are currently accepted.
    pub fn is_attached(&self) -> bool {
        self.shared.attached.load(Ordering::SeqCst)
    }

    /// Next command or query. `None` once every presenter port is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.commands.recv().await
    }

    /// Emit an event; returns its sequence number.
    pub fn emit(&mut self, phase: Phase, payload: EventPayload) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        let event = UpdateEvent::new(seq, phase, payload);
        if self.events.send(event).is_err() {
            debug!(seq, "event receiver gone; event discarded");
        }
        seq
    }
}

impl Drop for ControllerEndpoint {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Presenter half. Cheap to clone; every clone shares one listener table.
#[derive(Clone)]
pub struct PresenterPort {
    commands: mpsc::Sender<Envelope>,
    shared: Arc<Shared>,
}

impl PresenterPort {
    /// Forward a user gesture. Never queued while the controller is detached.
    pub fn send(&self, command: UserCommand) -> Dispatch {
        let name = command.name();
        if !self.is_attached() {
            debug!(command = name, "controller detached; command dropped");
            return Dispatch::Dropped;
        }
        match self.commands.try_send(Envelope::Command(command)) {
            Ok(()) => {
                debug!(command = name, "command dispatched");
                Dispatch::Delivered
            }
            Err(TrySendError::Full(_)) => {
                warn!(command = name, "command queue full; command dropped");
                Dispatch::Dropped
            }
            Err(TrySendError::Closed(_)) => {
                debug!(command = name, "controller gone; command dropped");
                Dispatch::Dropped
            }
        }
    }

    /// Ask the controller for the running version.
    pub async fn app_version(&self) -> Result<String> {
        if !self.is_attached() {
            return Err(BridgeError::Detached);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Envelope::AppVersion(reply_tx))
            .await
            .map_err(|_| BridgeError::Detached)?;
        reply_rx.await.map_err(|_| BridgeError::Detached)
    }

    /// Whether a controller currently accepts commands.
    pub fn is_attached(&self) -> bool {
        self.shared.attached.load(Ordering::SeqCst)
    }

    /// Register a handler for one topic.
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> Subscription
    where
        F: Fn(&UpdateEvent) + Send + Sync + 'static,
    {
        Subscription::register(&self.shared.listeners, topic, handler)
    }

    /// Live handlers across all topics.
    pub fn listener_count(&self) -> usize {
        self.shared.listeners.len()
    }

    /// Deliver every queued event to subscribers, in emission order.
    ///
    /// Returns the number of events drained. Yields zero once
    /// [`PresenterPort::spawn_dispatcher`] owns the receiver.
    pub fn dispatch_pending(&self) -> usize {
        let mut drained = Vec::new();
        {
            let mut guard = self.shared.events.lock();
            let Some(rx) = guard.as_mut() else {
                return 0;
            };
            while let Ok(event) = rx.try_recv() {
                drained.push(event);
            }
        }
        for event in &drained {
            self.shared.listeners.dispatch(event);
        }
        drained.len()
    }

    /// Move event delivery onto a background task.
    pub fn spawn_dispatcher(&self) -> Result<JoinHandle<()>> {
        let mut rx = self
            .shared
            .events
            .lock()
            .take()
            .ok_or(BridgeError::DispatcherRunning)?;
        let listeners = Arc::clone(&self.shared.listeners);
        Ok(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                listeners.dispatch(&event);
            }
            debug!("event stream closed; dispatcher exiting");
        }))
    }
}
