//! Delivery of job state transitions to subscribers.
//!
//! Every session gets one dispatcher task fed by an unbounded channel.
//! The poller only pushes snapshots into the channel, so a slow subscriber
//! never stalls polling. Because one task drains the channel, handlers for
//! a session run one at a time and see transitions in emission order.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::error::RegistryError;
use crate::state_machine::JobHandle;

/// Caller-chosen identifier of a session slot.
pub type SessionId = String;

/// Receives job snapshots, one call per transition.
///
/// An observer that panics is dropped from the session; the others keep
/// receiving transitions.
pub trait JobObserver: Send + 'static {
    fn on_transition(&mut self, session: &str, job: &JobHandle);
}

impl<F> JobObserver for F
where
    F: FnMut(&JobHandle) + Send + 'static,
{
    fn on_transition(&mut self, _session: &str, job: &JobHandle) {
        self(job)
    }
}

enum Command {
    Subscribe(Box<dyn JobObserver>),
    Notify(JobHandle),
}

/// Sending half for one session. Cheap to clone; handed to the poller.
#[derive(Clone)]
pub struct NotificationSink {
    session: SessionId,
    tx: mpsc::UnboundedSender<Command>,
}

impl NotificationSink {
    pub fn session(&self) -> &str {
        &self.session
    }

    /// Queue a transition for delivery. Never blocks.
    pub fn notify(&self, job: JobHandle) {
        if self.tx.send(Command::Notify(job)).is_err() {
            tracing::debug!(session = %self.session, "session closed, notification dropped");
        }
    }

    fn subscribe(&self, observer: Box<dyn JobObserver>) -> bool {
        self.tx.send(Command::Subscribe(observer)).is_ok()
    }
}

/// Per-session fan-out of job transitions.
#[derive(Default)]
pub struct NotificationHub {
    sessions: Mutex<HashMap<SessionId, NotificationSink>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the sink for `session`, spawning its dispatcher on first use.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(&self, session: &str) -> NotificationSink {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sink) = sessions.get(session) {
            return sink.clone();
        }
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(dispatch(session.to_string(), rx));
        let sink = NotificationSink {
            session: session.to_string(),
            tx,
        };
        sessions.insert(session.to_string(), sink.clone());
        sink
    }

    pub fn sink(&self, session: &str) -> Option<NotificationSink> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session)
            .cloned()
    }

    /// Register `observer` for every future transition of `session`.
    ///
    /// If the session already emitted something, the latest snapshot is
    /// replayed to the new observer first, so a late subscriber to a finished
    /// job still sees its terminal state.
    pub fn subscribe(
        &self,
        session: &str,
        observer: impl JobObserver,
    ) -> Result<(), RegistryError> {
        let sink = self
            .sink(session)
            .ok_or_else(|| RegistryError::NotFound(session.to_string()))?;
        if sink.subscribe(Box::new(observer)) {
            Ok(())
        } else {
            Err(RegistryError::NotFound(session.to_string()))
        }
    }

    /// Same as [`subscribe`](Self::subscribe), delivered over a channel.
    pub fn subscribe_stream(
        &self,
        session: &str,
    ) -> Result<mpsc::UnboundedReceiver<JobHandle>, RegistryError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribe(session, move |job: &JobHandle| {
            let _ = tx.send(job.clone());
        })?;
        Ok(rx)
    }

    /// Forget `session`. Queued notifications are still delivered; the
    /// dispatcher exits once the last sink clone is gone.
    pub fn close(&self, session: &str) {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session);
    }
}

async fn dispatch(session: SessionId, mut rx: mpsc::UnboundedReceiver<Command>) {
    let mut observers: Vec<Box<dyn JobObserver>> = Vec::new();
    let mut last: Option<JobHandle> = None;

    while let Some(command) = rx.recv().await {
        match command {
            Command::Subscribe(mut observer) => {
                let alive = match &last {
                    Some(job) => deliver(observer.as_mut(), &session, job),
                    None => true,
                };
                if alive {
                    observers.push(observer);
                }
            }
            Command::Notify(job) => {
                observers.retain_mut(|observer| deliver(observer.as_mut(), &session, &job));
                last = Some(job);
            }
        }
    }

    tracing::debug!(session = %session, "notification dispatcher stopped");
}

/// Run one handler. Returns `false` if it panicked.
fn deliver(observer: &mut dyn JobObserver, session: &str, job: &JobHandle) -> bool {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| observer.on_transition(session, job)));
    if outcome.is_err() {
        tracing::error!(session, job_id = %job.id, "observer panicked, unsubscribing it");
    }
    outcome.is_ok()
}
