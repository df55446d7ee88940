//! Client-side orchestration of long-running avatar video synthesis jobs.
//!
//! A job is created with a vendor ([`vendor::HeyGen`] or
//! [`vendor::AzureAvatar`]), then polled by a [`poller::JobPoller`] until it
//! reaches a terminal [`state_machine::JobState`]. The
//! [`registry::JobRegistry`] keeps one live job per session and fans state
//! transitions out to subscribers.

pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod observer;
pub mod poller;
pub mod registry;
pub mod state_machine;
pub mod transport;
pub mod ui;
pub mod vendor;

#[cfg(test)]
mod testing;
