use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::Deserialize as _;
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use super::{Event, ExecutionState, LifecycleNotifier, Notification};
use crate::Result;
use crate::protocol::SessionIdentity;
use crate::ws::error::WsError;
use crate::ws::traits::Dispatcher;

/// Key marking a message the server forwards for cell execution.
pub const EXEC_TAG: &str = "exec";

/// Turns decoded inbound messages into lifecycle notifications and fans them
/// out to message subscribers.
#[derive(Clone)]
pub struct SessionDispatcher {
    remote: Arc<SessionIdentity>,
    notifier: Arc<dyn LifecycleNotifier>,
    messages_tx: broadcast::Sender<Value>,
    awaiting_ready: Arc<AtomicBool>,
}

impl SessionDispatcher {
    #[must_use]
    pub fn new(
        remote: Arc<SessionIdentity>,
        notifier: Arc<dyn LifecycleNotifier>,
        messages_tx: broadcast::Sender<Value>,
    ) -> Self {
        Self {
            remote,
            notifier,
            messages_tx,
            awaiting_ready: Arc::new(AtomicBool::new(true)),
        }
    }

    /// The next `idle` status will also publish `ready`.
    pub fn expect_ready(&self) {
        self.awaiting_ready.store(true, Ordering::Release);
    }

    fn publish(&self, event: Event) {
        self.notifier
            .publish(Notification::new(Arc::clone(&self.remote), event));
    }

    fn on_status(&self, state: ExecutionState) {
        self.publish(state.into());

        match state {
            ExecutionState::Starting | ExecutionState::Restarting => self.expect_ready(),
            ExecutionState::Idle if self.awaiting_ready.swap(false, Ordering::AcqRel) => {
                self.publish(Event::Ready);
            }
            _ => {}
        }
    }
}

fn execution_state(message: &Map<String, Value>) -> Option<ExecutionState> {
    let msg_type = message.get("header")?.get("msg_type")?.as_str()?;
    if msg_type != "status" {
        return None;
    }

    let state = message.get("content")?.get("execution_state")?;
    ExecutionState::deserialize(state)
        .inspect_err(|_e| {
            #[cfg(feature = "tracing")]
            tracing::debug!(%state, "Ignoring unknown execution state");
        })
        .ok()
}

#[async_trait]
impl Dispatcher for SessionDispatcher {
    async fn dispatch(&self, message: Value) -> Result<()> {
        let Value::Object(map) = &message else {
            return Err(WsError::InvalidMessage(format!("expected a JSON object, got {message}")).into());
        };

        if let Some(exec) = map.get(EXEC_TAG) {
            #[cfg(feature = "tracing")]
            tracing::debug!(%exec, "Forwarding exec request");
            self.publish(Event::Exec { exec: exec.clone() });
        } else if let Some(state) = execution_state(map) {
            self.on_status(state);
        }

        _ = self.messages_tx.send(message);
        Ok(())
    }
}
