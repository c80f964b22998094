//! Lifecycle notifications published by the session channel.
//!
//! Events travel to a [`LifecycleNotifier`] wrapped in a [`Notification`]
//! that names the session they concern. The notifier is injected, so callers
//! decide whether events feed a UI, an orchestrator, or a test harness.

pub mod bus;
pub mod dispatch;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use bus::{BroadcastNotifier, LifecycleNotifier};
pub use dispatch::SessionDispatcher;

use crate::protocol::SessionIdentity;

/// Lifecycle events, displayed as their snake_case names (`connection_failed`, ...).
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, strum_macros::Display)]
#[serde(tag = "event", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Event {
    Created,
    Reconnecting,
    Connected,
    Starting,
    Restarting,
    Autorestarting,
    Interrupting,
    Disconnected,
    ConnectionFailed {
        master_url: String,
        attempt: u32,
    },
    ConnectionDead {
        reconnect_attempt: u32,
    },
    Ready,
    Killed,
    Dead,
    Idle,
    Busy,
    Exec {
        exec: Value,
    },
    InputReply {
        content: Value,
    },
}

/// Kernel execution states reported by inbound `status` messages.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExecutionState {
    Starting,
    Restarting,
    Autorestarting,
    Interrupting,
    Idle,
    Busy,
    Dead,
    Killed,
}

impl From<ExecutionState> for Event {
    fn from(state: ExecutionState) -> Self {
        match state {
            ExecutionState::Starting => Event::Starting,
            ExecutionState::Restarting => Event::Restarting,
            ExecutionState::Autorestarting => Event::Autorestarting,
            ExecutionState::Interrupting => Event::Interrupting,
            ExecutionState::Idle => Event::Idle,
            ExecutionState::Busy => Event::Busy,
            ExecutionState::Dead => Event::Dead,
            ExecutionState::Killed => Event::Killed,
        }
    }
}

/// An [`Event`] together with the session that emitted it.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct Notification {
    pub remote: Arc<SessionIdentity>,
    pub event: Event,
}

impl Notification {
    #[must_use]
    pub fn new(remote: Arc<SessionIdentity>, event: Event) -> Self {
        Self { remote, event }
    }

    /// Lifecycle name of the carried event.
    #[must_use]
    pub fn name(&self) -> String {
        self.event.to_string()
    }
}

/// Requests consumed by the connection manager.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Answer a pending input request on the `stdin` channel
    InputReply { value: String },
}
