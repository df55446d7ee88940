use std::fmt;

use serde::{Deserialize, Serialize};

/// The shared lifecycle of a synthesis job, independent of vendor.
///
/// Jobs flow through: SUBMITTED → RUNNING* → {SUCCEEDED | FAILED | CANCELLED | UNKNOWN}
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    /// Accepted by the vendor, no progress information yet.
    Submitted,
    /// Work in progress. `progress` is vendor text, shown as-is.
    Running { progress: Option<String> },
    Succeeded { artifact_url: String },
    Failed { reason: String },
    /// The caller withdrew interest before the vendor finished.
    Cancelled,
    /// The vendor said something we do not understand. Treated as a failure,
    /// but the payload is kept for diagnostics.
    Unknown { raw: serde_json::Value },
}

impl JobState {
    pub fn running(progress: impl Into<String>) -> Self {
        JobState::Running {
            progress: Some(progress.into()),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        JobState::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded { .. }
                | JobState::Failed { .. }
                | JobState::Cancelled
                | JobState::Unknown { .. }
        )
    }

    /// Position along the lifecycle. Terminal variants share the last rank.
    fn rank(&self) -> u8 {
        match self {
            JobState::Submitted => 0,
            JobState::Running { .. } => 1,
            _ => 2,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Submitted => write!(f, "SUBMITTED"),
            JobState::Running { progress: None } => write!(f, "RUNNING"),
            JobState::Running {
                progress: Some(progress),
            } => write!(f, "RUNNING ({progress})"),
            JobState::Succeeded { artifact_url } => write!(f, "SUCCEEDED: {artifact_url}"),
            JobState::Failed { reason } => write!(f, "FAILED: {reason}"),
            JobState::Cancelled => write!(f, "CANCELLED"),
            JobState::Unknown { raw } => write!(f, "UNKNOWN: {raw}"),
        }
    }
}

/// What applying a candidate state to the current one amounts to.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Move to the new state and notify observers.
    Advance(JobState),
    /// Nothing observable changed (same state again, or a non-terminal
    /// state that would move backwards).
    Stay,
    /// The job is already terminal; the candidate is discarded.
    Rejected,
}

/// Forward-only transition rules for [`JobState`].
pub struct StateMachine;

impl StateMachine {
    /// Decide how `next` applies on top of `current`.
    ///
    /// - A terminal `current` rejects everything.
    /// - A terminal `next` always advances.
    /// - A non-terminal `next` advances only if it moves forward, or stays
    ///   `Running` with different progress text.
    pub fn evaluate(current: &JobState, next: JobState) -> Transition {
        if current.is_terminal() {
            return Transition::Rejected;
        }
        if next.is_terminal() {
            return Transition::Advance(next);
        }
        if next == *current || next.rank() < current.rank() {
            return Transition::Stay;
        }
        Transition::Advance(next)
    }
}
