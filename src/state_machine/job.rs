use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::JobState;

/// Vendor-assigned opaque job identifier.
pub type JobId = String;

/// Output frame size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    pub width: u32,
    pub height: u32,
}

/// Synthesis inputs for one job. Unset fields fall back to the vendor's
/// configured defaults when the creation body is encoded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub text: String,
    pub voice: Option<String>,
    /// HeyGen avatar id, or the Azure avatar character.
    pub avatar: Option<String>,
    pub style: Option<String>,
    pub dimension: Option<Dimension>,
    pub speed: Option<f64>,
}

impl JobRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = Some(avatar.into());
        self
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = Some(style.into());
        self
    }

    pub fn with_dimension(mut self, width: u32, height: u32) -> Self {
        self.dimension = Some(Dimension { width, height });
        self
    }
}

/// Snapshot of one in-flight job.
///
/// The poller owns the live copy; everyone else sees clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: JobId,
    pub created_at: DateTime<Utc>,
    pub state: JobState,
    /// Number of polls performed so far.
    pub attempt: u32,
    pub last_polled_at: Option<DateTime<Utc>>,
}

impl JobHandle {
    pub fn new(id: JobId, state: JobState, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            created_at,
            state,
            attempt: 0,
            last_polled_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Timing and retry budget for the poll loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    /// Delay between a successful create and the first poll.
    pub initial_delay: Duration,
    /// Steady-state delay after a response that says the job is still going.
    pub poll_interval: Duration,
    /// First backoff delay after a transient transport failure.
    pub backoff_base: Duration,
    /// Upper bound for backoff delays.
    pub backoff_max: Duration,
    /// Failed attempts allowed before the job is declared exhausted.
    pub max_failed_attempts: u32,
    /// Wall-clock budget measured from job creation.
    pub max_duration: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            poll_interval: Duration::from_secs(2),
            backoff_base: Duration::from_secs(2),
            backoff_max: Duration::from_secs(30),
            max_failed_attempts: 5,
            max_duration: Duration::from_secs(600),
        }
    }
}

impl PollPolicy {
    /// Delay after the n-th consecutive transient failure.
    /// delay = backoff_base * 2^(n - 1), capped at backoff_max
    pub fn backoff_for_failure(&self, consecutive: u32) -> Duration {
        let factor = 2u32.saturating_pow(consecutive.saturating_sub(1));
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }
}
