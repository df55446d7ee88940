//! Session slots: at most one live job per session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use crate::clock::{Clock, TokioClock};
use crate::error::RegistryError;
use crate::observer::{JobObserver, NotificationHub, SessionId};
use crate::poller::{JobPoller, RunningJob};
use crate::state_machine::{JobHandle, JobRequest};
use crate::transport::Transport;

/// Returned by [`JobRegistry::start_session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    id: SessionId,
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }
}

enum Slot {
    Idle,
    /// Create call in flight; no job id yet.
    Submitting {
        ticket: u64,
        cancel_requested: bool,
    },
    Active(RunningJob),
}

impl Slot {
    fn is_busy(&self) -> bool {
        match self {
            Slot::Idle => false,
            Slot::Submitting { .. } => true,
            Slot::Active(job) => !job.is_terminal(),
        }
    }

    fn reserved_by(&self, ticket: u64) -> bool {
        matches!(self, Slot::Submitting { ticket: t, .. } if *t == ticket)
    }
}

type Slots = Mutex<HashMap<SessionId, Slot>>;

fn lock(slots: &Slots) -> MutexGuard<'_, HashMap<SessionId, Slot>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A `Submitting` reservation. Frees the slot on drop unless disarmed, so a
/// submit future dropped mid-create does not wedge the session.
struct Reservation<'a> {
    slots: &'a Slots,
    session: &'a str,
    ticket: u64,
    armed: bool,
}

impl Reservation<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut slots = lock(self.slots);
        if let Some(slot) = slots.get_mut(self.session) {
            if slot.reserved_by(self.ticket) {
                *slot = Slot::Idle;
                tracing::debug!(session = self.session, "abandoned submission released its slot");
            }
        }
    }
}

pub struct JobRegistry<T, C = TokioClock> {
    poller: JobPoller<T, C>,
    hub: NotificationHub,
    slots: Slots,
    next_ticket: AtomicU64,
}

impl<T, C> JobRegistry<T, C>
where
    T: Transport,
    C: Clock,
{
    pub fn new(poller: JobPoller<T, C>) -> Self {
        Self {
            poller,
            hub: NotificationHub::new(),
            slots: Mutex::new(HashMap::new()),
            next_ticket: AtomicU64::new(1),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<SessionId, Slot>> {
        lock(&self.slots)
    }

    /// Open a session slot. Starting an existing session leaves it untouched.
    pub fn start_session(&self, id: &str) -> SessionHandle {
        self.slots().entry(id.to_string()).or_insert(Slot::Idle);
        self.hub.open(id);
        tracing::debug!(session = id, "session started");
        SessionHandle { id: id.to_string() }
    }

    /// Submit a job into `session`.
    ///
    /// The slot is reserved before the create call goes out, so two racing
    /// submissions cannot both reach the vendor. Dropping the returned future
    /// before it completes releases the reservation. A slot whose previous
    /// job finished is reused.
    pub async fn submit(
        &self,
        session: &str,
        request: &JobRequest,
    ) -> Result<JobHandle, RegistryError> {
        let (sink, mut reservation) = {
            let mut slots = self.slots();
            let slot = slots
                .get_mut(session)
                .ok_or_else(|| RegistryError::NotFound(session.to_string()))?;
            if slot.is_busy() {
                return Err(RegistryError::AlreadyActive(session.to_string()));
            }
            let sink = self
                .hub
                .sink(session)
                .ok_or_else(|| RegistryError::NotFound(session.to_string()))?;
            let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
            *slot = Slot::Submitting {
                ticket,
                cancel_requested: false,
            };
            let reservation = Reservation {
                slots: &self.slots,
                session,
                ticket,
                armed: true,
            };
            (sink, reservation)
        };

        let result = self.poller.submit(request, sink).await;
        // No await from here on; the slot is settled below under one lock.
        reservation.disarm();

        let mut slots = self.slots();
        let slot = slots
            .get_mut(session)
            .filter(|slot| slot.reserved_by(reservation.ticket));
        match (result, slot) {
            (Ok(job), Some(slot)) => {
                if matches!(slot, Slot::Submitting { cancel_requested: true, .. }) {
                    job.cancel();
                }
                let snapshot = job.snapshot();
                *slot = Slot::Active(job);
                Ok(snapshot)
            }
            (Ok(job), None) => {
                // Session ended while the create call was in flight.
                job.cancel();
                Err(RegistryError::NotFound(session.to_string()))
            }
            (Err(e), slot) => {
                if let Some(slot) = slot {
                    *slot = Slot::Idle;
                }
                tracing::warn!(session, error = %e, "job submission failed");
                Err(e.into())
            }
        }
    }

    /// Cancel the active job of `session`. `Ok(false)` when there was
    /// nothing to cancel.
    ///
    /// During a pending submission the request is recorded and the job is
    /// cancelled as soon as the create call returns it.
    pub fn cancel(&self, session: &str) -> Result<bool, RegistryError> {
        match self.slots().get_mut(session) {
            None => Err(RegistryError::NotFound(session.to_string())),
            Some(Slot::Active(job)) => Ok(self.poller.cancel(job)),
            Some(Slot::Submitting {
                cancel_requested, ..
            }) => Ok(!std::mem::replace(cancel_requested, true)),
            Some(Slot::Idle) => Ok(false),
        }
    }

    /// Snapshot of the session's most recent job.
    pub fn current(&self, session: &str) -> Option<JobHandle> {
        match self.slots().get(session) {
            Some(Slot::Active(job)) => Some(job.snapshot()),
            _ => None,
        }
    }

    pub fn subscribe(&self, session: &str, observer: impl JobObserver) -> Result<(), RegistryError> {
        self.hub.subscribe(session, observer)
    }

    pub fn subscribe_stream(
        &self,
        session: &str,
    ) -> Result<mpsc::UnboundedReceiver<JobHandle>, RegistryError> {
        self.hub.subscribe_stream(session)
    }

    /// Drop the session, cancelling whatever it was running.
    pub fn end_session(&self, session: &str) {
        let slot = self.slots().remove(session);
        if let Some(Slot::Active(job)) = slot {
            job.cancel();
        }
        self.hub.close(session);
        tracing::debug!(session, "session ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{SubmitError, TransportError};
    use crate::state_machine::{JobState, PollPolicy};
    use crate::testing::{
        GatedTransport, HeldCreate, ManualClock, ScriptedTransport, assert_quiet, take_states,
    };
    use crate::vendor::HeyGen;
    use serde_json::json;
    use std::sync::Arc;

    fn registry<T: Transport>(transport: T) -> JobRegistry<T, ManualClock> {
        JobRegistry::new(JobPoller::new(
            transport,
            Arc::new(HeyGen::default()),
            ManualClock::new(),
            PollPolicy::default(),
        ))
    }

    fn gated() -> GatedTransport {
        GatedTransport::new(json!({"data": {"status": "processing"}}))
    }

    async fn until_terminal(rx: &mut mpsc::UnboundedReceiver<JobHandle>) -> JobHandle {
        loop {
            let job = rx.recv().await.expect("stream closed early");
            if job.is_terminal() {
                return job;
            }
        }
    }

    #[tokio::test]
    async fn submit_returns_initial_snapshot() {
        let reg = registry(gated());
        reg.start_session("s1");

        let job = reg.submit("s1", &JobRequest::new("hello")).await.unwrap();
        assert_eq!(job.id, "J1");
        assert_eq!(job.state, JobState::Submitted);
        assert_eq!(reg.current("s1").unwrap().id, "J1");
    }

    #[tokio::test]
    async fn second_submit_while_active_is_rejected() {
        let transport = Arc::new(gated());
        let reg = registry(transport.clone());
        reg.start_session("s1");
        reg.submit("s1", &JobRequest::new("first")).await.unwrap();

        let err = reg.submit("s1", &JobRequest::new("second")).await.unwrap_err();
        assert_eq!(err, RegistryError::AlreadyActive("s1".into()));

        let current = reg.current("s1").unwrap();
        assert_eq!(current.id, "J1");
        assert!(!current.is_terminal());
    }

    #[tokio::test]
    async fn unknown_session() {
        let reg = registry(gated());
        assert_eq!(
            reg.submit("ghost", &JobRequest::new("hi")).await.unwrap_err(),
            RegistryError::NotFound("ghost".into())
        );
        assert_eq!(reg.cancel("ghost").unwrap_err(), RegistryError::NotFound("ghost".into()));
        assert!(reg.current("ghost").is_none());
        assert!(reg.subscribe_stream("ghost").is_err());
    }

    #[tokio::test]
    async fn finished_job_is_replaced_by_next_submit() {
        let transport = ScriptedTransport::new()
            .created("J1")
            .created("J2")
            .completed("https://x/1.mp4")
            .completed("https://x/2.mp4");
        let reg = registry(transport);
        reg.start_session("s1");
        let mut rx = reg.subscribe_stream("s1").unwrap();

        reg.submit("s1", &JobRequest::new("one")).await.unwrap();
        let first = until_terminal(&mut rx).await;
        assert_eq!(first.id, "J1");

        let second = reg.submit("s1", &JobRequest::new("two")).await.unwrap();
        assert_eq!(second.id, "J2");
        let done = until_terminal(&mut rx).await;
        assert_eq!(
            done.state,
            JobState::Succeeded {
                artifact_url: "https://x/2.mp4".into()
            }
        );
    }

    #[tokio::test]
    async fn failed_submit_frees_the_slot() {
        let transport = ScriptedTransport::new()
            .create_result(Err(TransportError::Network("refused".into())))
            .created("J2");
        let reg = registry(transport);
        reg.start_session("s1");

        let err = reg.submit("s1", &JobRequest::new("hi")).await.unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Submit(SubmitError::Transport(TransportError::Network(_)))
        ));
        assert!(reg.current("s1").is_none());

        let job = reg.submit("s1", &JobRequest::new("hi")).await.unwrap();
        assert_eq!(job.id, "J2");
    }

    #[tokio::test]
    async fn blank_text_rejected() {
        let reg = registry(gated());
        reg.start_session("s1");
        let err = reg.submit("s1", &JobRequest::new("")).await.unwrap_err();
        assert_eq!(err, RegistryError::Submit(SubmitError::EmptyText));
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let transport = Arc::new(gated());
        let reg = registry(transport.clone());
        reg.start_session("s1");
        let mut rx = reg.subscribe_stream("s1").unwrap();

        assert!(!reg.cancel("s1").unwrap());
        reg.submit("s1", &JobRequest::new("hi")).await.unwrap();
        transport.entered.notified().await;

        assert!(reg.cancel("s1").unwrap());
        assert!(!reg.cancel("s1").unwrap());
        assert_eq!(reg.current("s1").unwrap().state, JobState::Cancelled);
        assert_eq!(
            take_states(&mut rx, 2).await,
            vec![JobState::Submitted, JobState::Cancelled]
        );
    }

    #[tokio::test]
    async fn late_subscriber_sees_latest_state() {
        let reg = registry(gated());
        reg.start_session("s1");
        reg.submit("s1", &JobRequest::new("hi")).await.unwrap();
        reg.cancel("s1").unwrap();

        let mut rx = reg.subscribe_stream("s1").unwrap();
        assert_eq!(take_states(&mut rx, 1).await, vec![JobState::Cancelled]);
    }

    #[tokio::test]
    async fn end_session_cancels_active_job() {
        let reg = registry(gated());
        reg.start_session("s1");
        let mut rx = reg.subscribe_stream("s1").unwrap();
        reg.submit("s1", &JobRequest::new("hi")).await.unwrap();

        reg.end_session("s1");

        assert!(reg.current("s1").is_none());
        assert_eq!(
            take_states(&mut rx, 2).await,
            vec![JobState::Submitted, JobState::Cancelled]
        );
        assert_eq!(
            reg.cancel("s1").unwrap_err(),
            RegistryError::NotFound("s1".into())
        );
    }

    #[tokio::test]
    async fn start_session_is_idempotent() {
        let reg = registry(gated());
        let a = reg.start_session("s1");
        reg.submit("s1", &JobRequest::new("hi")).await.unwrap();
        let b = reg.start_session("s1");

        assert_eq!(a, b);
        assert_eq!(a.id(), "s1");
        assert_eq!(reg.current("s1").unwrap().id, "J1");
    }

    #[tokio::test]
    async fn sessions_do_not_share_slots() {
        let reg = registry(gated());
        reg.start_session("a");
        reg.start_session("b");
        reg.submit("a", &JobRequest::new("hi")).await.unwrap();

        assert!(reg.submit("b", &JobRequest::new("hi")).await.is_ok());
        assert!(reg.cancel("a").unwrap());
        assert!(!reg.current("b").unwrap().is_terminal());
    }

    #[tokio::test]
    async fn dropped_submit_frees_the_slot() {
        let transport = Arc::new(HeldCreate::new());
        let reg = registry(transport.clone());
        reg.start_session("s1");

        let abandoned = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            reg.submit("s1", &JobRequest::new("first")),
        )
        .await;
        assert!(abandoned.is_err());
        assert!(reg.current("s1").is_none());
        assert!(!reg.cancel("s1").unwrap());

        transport.release.notify_one();
        let job = reg.submit("s1", &JobRequest::new("second")).await.unwrap();
        assert_eq!(job.id, "J2");
        assert_eq!(transport.create_calls(), 2);
        assert_eq!(reg.current("s1").unwrap().id, "J2");
    }

    #[tokio::test]
    async fn submit_while_creating_is_rejected() {
        let transport = Arc::new(HeldCreate::new());
        let reg = registry(transport.clone());
        reg.start_session("s1");

        let req_a = JobRequest::new("a");
        let (first, second) = tokio::join!(reg.submit("s1", &req_a), async {
            transport.entered.notified().await;
            let second = reg.submit("s1", &JobRequest::new("b")).await;
            transport.release.notify_one();
            second
        });

        assert_eq!(first.unwrap().id, "J1");
        assert_eq!(second.unwrap_err(), RegistryError::AlreadyActive("s1".into()));
        assert_eq!(transport.create_calls(), 1);
    }

    #[tokio::test]
    async fn cancel_during_create_cancels_the_new_job() {
        let transport = Arc::new(HeldCreate::new());
        let reg = registry(transport.clone());
        reg.start_session("s1");
        let mut rx = reg.subscribe_stream("s1").unwrap();

        let req_hi = JobRequest::new("hi");
        let (submitted, ()) = tokio::join!(reg.submit("s1", &req_hi), async {
            transport.entered.notified().await;
            assert!(reg.cancel("s1").unwrap());
            assert!(!reg.cancel("s1").unwrap());
            transport.release.notify_one();
        });

        let job = submitted.unwrap();
        assert_eq!(job.state, JobState::Cancelled);
        assert_eq!(reg.current("s1").unwrap().state, JobState::Cancelled);
        assert_eq!(
            take_states(&mut rx, 2).await,
            vec![JobState::Submitted, JobState::Cancelled]
        );
        assert_quiet(&mut rx).await;

        // The slot is free again.
        transport.release.notify_one();
        assert_eq!(reg.submit("s1", &JobRequest::new("again")).await.unwrap().id, "J2");
    }
}
