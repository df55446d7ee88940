mod job;
mod state;

pub use job::{Dimension, JobHandle, JobId, JobRequest, PollPolicy};
pub use state::{JobState, StateMachine, Transition};
