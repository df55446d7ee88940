//! The job lifecycle: submit, poll until terminal, cancel.
//!
//! Each submitted job gets a [`JobCell`] holding the live [`JobHandle`]
//! behind a mutex, and a tokio task running the poll loop. Network calls
//! happen outside the lock; results are applied under it. That lock is the
//! only place a handle is ever mutated, which is what makes cancellation
//! race-free: once `cancel` has flipped the state, any response still in
//! flight is discarded when it lands.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, TokioClock};
use crate::error::{NormalizationError, SubmitError, TransportError};
use crate::observer::NotificationSink;
use crate::state_machine::{JobHandle, JobId, JobRequest, JobState, PollPolicy, StateMachine, Transition};
use crate::transport::{RawStatusResponse, Transport};
use crate::vendor::Normalizer;

/// Reason given when transient failures use up the retry budget.
pub const POLLING_EXHAUSTED: &str = "polling exhausted";

/// Raw payload recorded when a job outlives its wall-clock budget.
pub const TIMEOUT: &str = "timeout";

/// What applying a result to a [`JobCell`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Applied {
    Advanced,
    Unchanged,
    /// Stale attempt, or the job was already terminal.
    Discarded,
}

struct CellState {
    handle: JobHandle,
    /// Highest poll attempt whose result has been applied.
    applied_attempt: u32,
}

/// The live handle of one job plus its notification sink.
struct JobCell {
    state: Mutex<CellState>,
    sink: NotificationSink,
}

impl JobCell {
    fn new(handle: JobHandle, sink: NotificationSink) -> Self {
        sink.notify(handle.clone());
        Self {
            state: Mutex::new(CellState {
                handle,
                applied_attempt: 0,
            }),
            sink,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CellState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> JobHandle {
        self.lock().handle.clone()
    }

    fn is_terminal(&self) -> bool {
        self.lock().handle.is_terminal()
    }

    /// Count a poll about to be issued. Returns its attempt number, or
    /// `None` if the job already finished.
    fn begin_poll(&self, at: DateTime<Utc>) -> Option<u32> {
        let mut cell = self.lock();
        if cell.handle.is_terminal() {
            return None;
        }
        cell.handle.attempt += 1;
        cell.handle.last_polled_at = Some(at);
        Some(cell.handle.attempt)
    }

    /// Apply the result of poll `attempt`. Results older than the newest
    /// applied one are dropped.
    fn apply(&self, attempt: u32, next: JobState) -> Applied {
        let mut cell = self.lock();
        if attempt <= cell.applied_attempt {
            tracing::debug!(
                job_id = %cell.handle.id,
                attempt,
                applied = cell.applied_attempt,
                "discarding out-of-order poll result",
            );
            return Applied::Discarded;
        }
        if cell.handle.is_terminal() {
            return Applied::Discarded;
        }
        cell.applied_attempt = attempt;
        self.transition(&mut cell, next)
    }

    /// Move to `next` regardless of attempt ordering (deadline, cancel).
    fn force(&self, next: JobState) -> Applied {
        let mut cell = self.lock();
        self.transition(&mut cell, next)
    }

    fn transition(&self, cell: &mut CellState, next: JobState) -> Applied {
        match StateMachine::evaluate(&cell.handle.state, next) {
            Transition::Advance(state) => {
                tracing::info!(
                    job_id = %cell.handle.id,
                    session = %self.sink.session(),
                    attempt = cell.handle.attempt,
                    state = %state,
                    "job state changed",
                );
                cell.handle.state = state;
                // Emitted under the lock so notifications keep transition order.
                self.sink.notify(cell.handle.clone());
                Applied::Advanced
            }
            Transition::Stay => Applied::Unchanged,
            Transition::Rejected => Applied::Discarded,
        }
    }
}

/// A submitted job: its live state, its cancellation flag and its poll task.
pub struct RunningJob {
    id: JobId,
    cell: Arc<JobCell>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RunningJob {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn snapshot(&self) -> JobHandle {
        self.cell.snapshot()
    }

    pub fn is_terminal(&self) -> bool {
        self.cell.is_terminal()
    }

    /// Cancel the job if it has not finished yet.
    ///
    /// The state becomes `Cancelled` before this returns. Returns `false`
    /// (and does nothing) when the job was already terminal, so calling it
    /// twice is harmless.
    pub fn cancel(&self) -> bool {
        let cancelled = self.cell.force(JobState::Cancelled) == Applied::Advanced;
        self.cancel.cancel();
        cancelled
    }

    /// Wait for the poll task to stop and return the final snapshot.
    pub async fn wait(&mut self) -> JobHandle {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(job_id = %self.id, error = %e, "poll task ended abnormally");
            }
        }
        self.snapshot()
    }
}

/// Drives jobs through submit → poll → terminal.
pub struct JobPoller<T, C = TokioClock> {
    transport: Arc<T>,
    normalizer: Arc<dyn Normalizer>,
    clock: Arc<C>,
    policy: PollPolicy,
}

impl<T, C> JobPoller<T, C>
where
    T: Transport,
    C: Clock,
{
    pub fn new(transport: T, normalizer: Arc<dyn Normalizer>, clock: C, policy: PollPolicy) -> Self {
        Self {
            transport: Arc::new(transport),
            normalizer,
            clock: Arc::new(clock),
            policy,
        }
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Create the job with the vendor and start polling it.
    ///
    /// Fails without polling if the request is invalid, the create call
    /// fails, or its response cannot be understood. On success the initial
    /// state has already been sent to `sink`.
    pub async fn submit(
        &self,
        request: &JobRequest,
        sink: NotificationSink,
    ) -> Result<RunningJob, SubmitError> {
        if request.text.trim().is_empty() {
            return Err(SubmitError::EmptyText);
        }

        let raw = self.transport.create(request).await?;
        let (id, state) = self.normalizer.normalize_create(raw)?;

        tracing::info!(job_id = %id, session = %sink.session(), "job submitted");

        let handle = JobHandle::new(id.clone(), state, self.clock.now());
        let cell = Arc::new(JobCell::new(handle, sink));
        let cancel = CancellationToken::new();

        let poll = PollLoop {
            transport: self.transport.clone(),
            normalizer: self.normalizer.clone(),
            clock: self.clock.clone(),
            policy: self.policy.clone(),
            cell: cell.clone(),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(poll.run());

        Ok(RunningJob {
            id,
            cell,
            cancel,
            task: Some(task),
        })
    }

    /// Cancel `job`. See [`RunningJob::cancel`].
    pub fn cancel(&self, job: &RunningJob) -> bool {
        job.cancel()
    }

    /// One-off status check for a job this poller did not submit.
    pub async fn check(&self, job_id: &str) -> JobState {
        classify(self.transport.fetch_status(job_id).await, self.normalizer.as_ref()).into_state()
    }
}

/// How one poll result affects the loop.
#[derive(Debug, Clone, PartialEq)]
enum PollOutcome {
    /// The vendor says the job is still going.
    Pending(JobState),
    /// The job is over, one way or another.
    Finished(JobState),
    /// Transient transport failure; try again after backoff.
    Retry(TransportError),
}

impl PollOutcome {
    fn into_state(self) -> JobState {
        match self {
            PollOutcome::Pending(state) | PollOutcome::Finished(state) => state,
            PollOutcome::Retry(err) => JobState::failed(err.to_string()),
        }
    }
}

fn classify(
    result: Result<RawStatusResponse, TransportError>,
    normalizer: &dyn Normalizer,
) -> PollOutcome {
    let raw = match result {
        Ok(raw) => raw,
        Err(err) if err.is_retryable() => return PollOutcome::Retry(err),
        Err(TransportError::Http { status, .. }) => {
            return PollOutcome::Finished(JobState::failed(format!("HTTP {status}")));
        }
        Err(TransportError::Decode { body, .. }) => {
            return PollOutcome::Finished(JobState::Unknown {
                raw: serde_json::Value::String(body),
            });
        }
        Err(err) => return PollOutcome::Finished(JobState::failed(err.to_string())),
    };

    match normalizer.normalize_status(raw) {
        Ok(state) if state.is_terminal() => PollOutcome::Finished(state),
        Ok(state) => PollOutcome::Pending(state),
        Err(NormalizationError::UnrecognizedStatus { raw }) => {
            PollOutcome::Finished(JobState::Unknown { raw })
        }
        Err(err) => PollOutcome::Finished(JobState::failed(err.to_string())),
    }
}

struct PollLoop<T, C> {
    transport: Arc<T>,
    normalizer: Arc<dyn Normalizer>,
    clock: Arc<C>,
    policy: PollPolicy,
    cell: Arc<JobCell>,
    cancel: CancellationToken,
}

impl<T: Transport, C: Clock> PollLoop<T, C> {
    async fn run(self) {
        let (job_id, created_at) = {
            let handle = self.cell.snapshot();
            (handle.id, handle.created_at)
        };
        let budget = TimeDelta::from_std(self.policy.max_duration).unwrap_or(TimeDelta::MAX);
        let deadline = created_at.checked_add_signed(budget).unwrap_or(DateTime::<Utc>::MAX_UTC);
        let max_failed = self.policy.max_failed_attempts.max(1);

        let mut delay = self.policy.initial_delay;
        let mut consecutive_failures = 0u32;
        let mut failed_attempts = 0u32;

        while !self.cell.is_terminal() {
            let remaining = (deadline - self.clock.now()).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = self.clock.sleep(delay.min(remaining)) => {}
            }

            if self.clock.now() >= deadline {
                tracing::warn!(job_id = %job_id, "job exceeded its polling deadline");
                self.cell.force(JobState::Unknown {
                    raw: serde_json::Value::String(TIMEOUT.to_string()),
                });
                break;
            }

            let Some(attempt) = self.cell.begin_poll(self.clock.now()) else {
                break;
            };

            let result = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.transport.fetch_status(&job_id) => result,
            };

            match classify(result, self.normalizer.as_ref()) {
                PollOutcome::Pending(state) => {
                    consecutive_failures = 0;
                    delay = self.policy.poll_interval;
                    self.cell.apply(attempt, state);
                }
                PollOutcome::Finished(state) => {
                    self.cell.apply(attempt, state);
                    break;
                }
                PollOutcome::Retry(err) => {
                    failed_attempts += 1;
                    consecutive_failures += 1;
                    if failed_attempts >= max_failed {
                        tracing::warn!(
                            job_id = %job_id,
                            attempt,
                            failed_attempts,
                            error = %err,
                            "giving up after repeated transport failures",
                        );
                        self.cell.apply(attempt, JobState::failed(POLLING_EXHAUSTED));
                        break;
                    }
                    delay = self.policy.backoff_for_failure(consecutive_failures);
                    tracing::warn!(
                        job_id = %job_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "poll failed, backing off",
                    );
                }
            }
        }

        tracing::debug!(job_id = %job_id, "poll loop stopped");
    }
}
