use futures::Stream;
use futures::stream::BoxStream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use super::{Command, Notification};

/// Broadcast channel capacity for lifecycle notifications.
const BROADCAST_CAPACITY: usize = 256;

/// The lifecycle event bus a connection manager is attached to.
///
/// Implementations must not block and must not call back into the
/// connection manager synchronously.
pub trait LifecycleNotifier: Send + Sync + 'static {
    fn publish(&self, notification: Notification);

    /// Commands for connection managers on this bus, subscribed once per
    /// manager at construction. Buses that carry no commands return `None`.
    fn subscribe_commands(&self) -> Option<BoxStream<'static, Command>> {
        None
    }
}

/// [`LifecycleNotifier`] backed by a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Notification>,
    commands_tx: broadcast::Sender<Command>,
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(BROADCAST_CAPACITY)
    }
}

impl BroadcastNotifier {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        let (commands_tx, _) = broadcast::channel(capacity);
        Self { tx, commands_tx }
    }

    /// Delivers `command` to every connection manager attached to this bus.
    /// Returns how many received it.
    pub fn send_command(&self, command: Command) -> usize {
        self.commands_tx.send(command).unwrap_or(0)
    }

    /// Each call returns a new independent receiver.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    /// Notifications as a stream. Slow consumers skip what they missed.
    pub fn stream(&self) -> impl Stream<Item = Notification> + use<> {
        let mut rx = self.tx.subscribe();

        async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(notification) => yield notification,
                    Err(RecvError::Lagged(count)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Notification stream lagged, missed {count} events");
                        #[cfg(not(feature = "tracing"))]
                        let _ = count;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
}

impl LifecycleNotifier for BroadcastNotifier {
    fn publish(&self, notification: Notification) {
        #[cfg(feature = "tracing")]
        tracing::debug!(event = %notification.event, session = %notification.remote.session_id, "Publishing notification");
        _ = self.tx.send(notification);
    }

    fn subscribe_commands(&self) -> Option<BoxStream<'static, Command>> {
        let mut rx = self.commands_tx.subscribe();

        let stream = async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(command) => yield command,
                    Err(RecvError::Lagged(count)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Command stream lagged, missed {count} commands");
                        #[cfg(not(feature = "tracing"))]
                        let _ = count;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        };
        Some(Box::pin(stream))
    }
}
