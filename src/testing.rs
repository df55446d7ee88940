//! Test doubles shared by the poller and registry tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use tokio::sync::{Notify, mpsc};

use crate::clock::Clock;
use crate::error::TransportError;
use crate::state_machine::{JobHandle, JobRequest, JobState};
use crate::transport::{RawCreateResponse, RawStatusResponse, Transport};

/// Clock that advances instantly by whatever the poller asks to sleep.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Utc.with_ymd_and_hms(2025, 3, 30, 12, 0, 0).unwrap())),
            sleeps: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        {
            let mut now = self.now.lock().unwrap();
            *now += chrono::Duration::from_std(duration).unwrap();
            self.sleeps.lock().unwrap().push(duration);
        }
        tokio::task::yield_now().await;
    }
}

/// Transport that replays canned responses in order.
///
/// Once the status script runs dry every further poll is a network error.
#[derive(Default)]
pub struct ScriptedTransport {
    creates: Mutex<VecDeque<Result<RawCreateResponse, TransportError>>>,
    statuses: Mutex<VecDeque<Result<RawStatusResponse, TransportError>>>,
    create_calls: AtomicU32,
    status_calls: AtomicU32,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// HeyGen-shaped create reply carrying `video_id`.
    pub fn created(self, video_id: &str) -> Self {
        self.create_result(Ok(RawCreateResponse(
            json!({"error": null, "data": {"video_id": video_id}}),
        )))
    }

    pub fn create_result(self, result: Result<RawCreateResponse, TransportError>) -> Self {
        self.creates.lock().unwrap().push_back(result);
        self
    }

    /// HeyGen-shaped status reply.
    pub fn status(self, status: &str) -> Self {
        self.status_result(Ok(RawStatusResponse(json!({"code": 100, "data": {"status": status}}))))
    }

    pub fn completed(self, url: &str) -> Self {
        self.status_result(Ok(RawStatusResponse(
            json!({"code": 100, "data": {"status": "completed", "video_url": url}}),
        )))
    }

    pub fn http_error(self, status: u16) -> Self {
        self.status_result(Err(TransportError::Http {
            status,
            body: String::new(),
        }))
    }

    pub fn status_result(self, result: Result<RawStatusResponse, TransportError>) -> Self {
        self.statuses.lock().unwrap().push_back(result);
        self
    }

    pub fn create_calls(&self) -> u32 {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }
}

impl Transport for ScriptedTransport {
    async fn create(&self, _request: &JobRequest) -> Result<RawCreateResponse, TransportError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.creates
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Network("no scripted create".into())))
    }

    async fn fetch_status(&self, _job_id: &str) -> Result<RawStatusResponse, TransportError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Network("script exhausted".into())))
    }
}

/// Transport whose status call parks until the test releases it.
pub struct GatedTransport {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
    reply: RawStatusResponse,
}

impl GatedTransport {
    pub fn new(reply: serde_json::Value) -> Self {
        Self {
            entered: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
            reply: RawStatusResponse(reply),
        }
    }
}

impl Transport for GatedTransport {
    async fn create(&self, _request: &JobRequest) -> Result<RawCreateResponse, TransportError> {
        Ok(RawCreateResponse(json!({"data": {"video_id": "J1"}})))
    }

    async fn fetch_status(&self, _job_id: &str) -> Result<RawStatusResponse, TransportError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(self.reply.clone())
    }
}

/// Transport whose create call parks until the test releases it. Status
/// calls never answer, so a created job stays live until cancelled.
#[derive(Default)]
pub struct HeldCreate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
    create_calls: AtomicU32,
}

impl HeldCreate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_calls(&self) -> u32 {
        self.create_calls.load(Ordering::SeqCst)
    }
}

impl Transport for HeldCreate {
    async fn create(&self, _request: &JobRequest) -> Result<RawCreateResponse, TransportError> {
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.entered.notify_one();
        self.release.notified().await;
        Ok(RawCreateResponse(json!({"data": {"video_id": format!("J{n}")}})))
    }

    async fn fetch_status(&self, _job_id: &str) -> Result<RawStatusResponse, TransportError> {
        std::future::pending().await
    }
}

/// Pull exactly `n` states off a subscription stream.
pub async fn take_states(rx: &mut mpsc::UnboundedReceiver<JobHandle>, n: usize) -> Vec<JobState> {
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        let job = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for notification")
            .expect("stream closed early");
        out.push(job.state);
    }
    out
}

/// Assert that nothing else arrives on the stream for a short while.
pub async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<JobHandle>) {
    let extra = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
    if let Ok(Some(job)) = extra {
        panic!("unexpected notification: {}", job.state);
    }
}
