#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::StreamExt as _;
use futures::stream::BoxStream;
use serde_json::{Value, json};
use tokio::sync::{broadcast, watch};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use super::backoff::BackoffScheduler;
use super::config::Config;
use super::sequencer::MessageSequencer;
use super::traits::Codec;
use super::transport::{
    CloseInfo, CloseLatch, Connector, EventStream, Frame, Transport, TransportEvent,
    TungsteniteConnector,
};
use crate::Result;
use crate::error::Error;
use crate::events::{Command, Event, LifecycleNotifier, Notification, SessionDispatcher};
use crate::protocol::{EnvelopeBuilder, JsonCodec, STDIN_CHANNEL, SessionIdentity};

/// Broadcast channel capacity for decoded inbound messages.
const BROADCAST_CAPACITY: usize = 1024;

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport and no pending reconnect
    Disconnected,
    /// A transport has been opened and has not reported ready yet
    Connecting,
    /// Transport is open
    Connected {
        /// When the connection was established
        since: Instant,
    },
    /// Waiting out the backoff delay before the next attempt
    Reconnecting {
        /// Reconnection attempts made so far
        attempt: u32,
    },
    /// Reconnection attempts exhausted; only an explicit start revives the channel
    Dead {
        /// Attempts made before giving up
        reconnect_attempt: u32,
    },
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected { .. })
    }
}

/// Why a transport stopped.
enum Closure {
    Error(String),
    Closed(CloseInfo),
}

/// The live transport with its per-instance bookkeeping.
struct Link {
    id: u64,
    transport: Transport,
    latch: CloseLatch,
    created_at: Instant,
}

#[derive(Default)]
struct Slot {
    link: Option<Link>,
    reconnect_attempt: u32,
    reconnect_timer: Option<CancellationToken>,
    next_id: u64,
}

struct Inner {
    identity: Arc<SessionIdentity>,
    endpoint: Url,
    config: Config,
    scheduler: BackoffScheduler,
    envelopes: EnvelopeBuilder,
    connector: Arc<dyn Connector>,
    codec: Arc<dyn Codec>,
    notifier: Arc<dyn LifecycleNotifier>,
    dispatcher: Arc<SessionDispatcher>,
    sequencer: MessageSequencer,
    broadcast_tx: broadcast::Sender<Value>,
    state_tx: watch::Sender<ConnectionState>,
    slot: Mutex<Slot>,
}

/// Owns the session's single WebSocket transport and keeps it alive.
///
/// - Opens `{master_url}/api/sessions/{session_id}/ws` on [`start_channel`](Self::start_channel)
/// - Reconnects after failures with exponential backoff, giving up after the
///   configured number of attempts
/// - Feeds inbound frames through a [`MessageSequencer`] so they are handled
///   strictly in arrival order
/// - Publishes lifecycle [`Event`]s to the injected [`LifecycleNotifier`]
///
/// Every method must be called from within a tokio runtime.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
///
/// use notebook_session_client::ConnectionManager;
/// use notebook_session_client::events::BroadcastNotifier;
/// use notebook_session_client::protocol::SessionIdentity;
///
/// # async fn example() -> notebook_session_client::Result<()> {
/// let bus = Arc::new(BroadcastNotifier::default());
/// let mut notifications = bus.subscribe();
///
/// let connection = ConnectionManager::builder()
///     .identity(SessionIdentity::new("http://localhost:8888", "5f2c", "alice")?)
///     .notifier(bus)
///     .build()?;
/// connection.start_channel()?;
///
/// while let Ok(notification) = notifications.recv().await {
///     println!("{}", notification.name());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

#[bon::bon]
impl ConnectionManager {
    /// Create a connection manager. The channel stays closed until
    /// [`start_channel`](Self::start_channel) is called.
    ///
    /// [`Command`]s arriving through
    /// [`LifecycleNotifier::subscribe_commands`] are executed for as long as the
    /// manager lives.
    ///
    /// `connector` defaults to [`TungsteniteConnector`] and `codec` to [`JsonCodec`].
    #[builder]
    pub fn new(
        identity: SessionIdentity,
        notifier: Arc<dyn LifecycleNotifier>,
        #[builder(default)] config: Config,
        connector: Option<Arc<dyn Connector>>,
        codec: Option<Arc<dyn Codec>>,
    ) -> Result<Self> {
        let endpoint = identity.endpoint()?;
        let identity = Arc::new(identity);
        let connector = connector
            .unwrap_or_else(|| Arc::new(TungsteniteConnector::new(config.clone())));
        let codec = codec.unwrap_or_else(|| Arc::new(JsonCodec));

        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        let dispatcher = Arc::new(SessionDispatcher::new(
            Arc::clone(&identity),
            Arc::clone(&notifier),
            broadcast_tx.clone(),
        ));
        let sequencer =
            MessageSequencer::spawn(Arc::clone(&codec), Arc::clone(&dispatcher) as _);

        let inner = Arc::new(Inner {
            envelopes: EnvelopeBuilder::new(Arc::clone(&identity)),
            scheduler: BackoffScheduler::new(&config.reconnect),
            identity,
            endpoint,
            config,
            connector,
            codec,
            notifier,
            dispatcher,
            sequencer,
            broadcast_tx,
            state_tx,
            slot: Mutex::new(Slot::default()),
        });

        if let Some(commands) = inner.notifier.subscribe_commands() {
            tokio::spawn(Inner::command_loop(Arc::downgrade(&inner), commands));
        }
        inner.publish(Event::Created);

        Ok(Self { inner })
    }

    /// Open a new transport, closing any existing one first.
    ///
    /// Cancels a pending reconnect. Starting from [`ConnectionState::Dead`]
    /// resets the reconnect counter.
    pub fn start_channel(&self) -> Result<()> {
        let mut slot = self.inner.lock();
        Inner::cancel_reconnect(&mut slot);
        if matches!(self.state(), ConnectionState::Dead { .. }) {
            slot.reconnect_attempt = 0;
        }
        self.inner.open_link(&mut slot)
    }

    /// Close the transport, if any, and cancel a pending reconnect. Idempotent.
    pub fn stop_channel(&self) {
        let mut slot = self.inner.lock();
        Inner::cancel_reconnect(&mut slot);
        Inner::detach(&mut slot);
        self.inner.set_state(ConnectionState::Disconnected);
    }

    /// `true` only while a transport exists and reports open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner
            .lock()
            .link
            .as_ref()
            .is_some_and(|link| link.transport.is_open())
    }

    /// `true` only when no transport handle exists at all.
    #[must_use]
    pub fn is_fully_disconnected(&self) -> bool {
        self.inner.lock().link.is_none()
    }

    /// Answer an input request on the `stdin` channel.
    ///
    /// Fails with [`Kind::NotConnected`](crate::error::Kind::NotConnected)
    /// without side effects unless the channel is open. Returns the id of the
    /// sent message.
    pub fn send_input_reply<S: Into<String>>(&self, value: S) -> Result<Uuid> {
        let transport = self
            .inner
            .lock()
            .link
            .as_ref()
            .map(|link| link.transport.clone())
            .filter(Transport::is_open)
            .ok_or_else(|| Error::not_connected(self.state()))?;

        let envelope = self
            .inner
            .envelopes
            .message()
            .msg_type("input_reply")
            .content(json!({ "value": value.into() }))
            .channel(STDIN_CHANNEL)
            .call();
        let frame = self.inner.codec.encode(&envelope)?;

        self.inner.publish(Event::InputReply {
            content: envelope.content.clone(),
        });
        transport.send(frame)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(msg_id = %envelope.header.msg_id, "Sent input reply");

        Ok(envelope.header.msg_id)
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Reconnection attempts since the last successful open.
    #[must_use]
    pub fn reconnect_attempt(&self) -> u32 {
        self.inner.lock().reconnect_attempt
    }

    /// Subscribe to every decoded inbound message.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.inner.broadcast_tx.subscribe()
    }

    #[must_use]
    pub fn identity(&self) -> &Arc<SessionIdentity> {
        &self.inner.identity
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.inner.endpoint
    }

    /// Inbound messages handled successfully so far.
    #[must_use]
    pub fn messages_dispatched(&self) -> u64 {
        self.inner.sequencer.dispatched()
    }

    /// Inbound messages dropped because they failed to decode or dispatch.
    #[must_use]
    pub fn messages_failed(&self) -> u64 {
        self.inner.sequencer.failed()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ConnectionState) {
        #[cfg(feature = "tracing")]
        tracing::debug!(?state, session = %self.identity.session_id, "Connection state changed");
        self.state_tx.send_replace(state);
    }

    fn publish(&self, event: Event) {
        self.notifier
            .publish(Notification::new(Arc::clone(&self.identity), event));
    }

    fn cancel_reconnect(slot: &mut Slot) {
        if let Some(timer) = slot.reconnect_timer.take() {
            timer.cancel();
        }
    }

    /// Drops the current transport after silencing its close handlers.
    fn detach(slot: &mut Slot) {
        if let Some(link) = slot.link.take() {
            link.latch.fire();
            link.transport.close();
        }
    }

    fn open_link(self: &Arc<Self>, slot: &mut Slot) -> Result<()> {
        Self::detach(slot);

        let (transport, events) = match self.connector.open(&self.endpoint) {
            Ok(opened) => opened,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::error!(endpoint = %self.endpoint, "Unable to open transport: {e}");
                self.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        slot.next_id += 1;
        let id = slot.next_id;
        let latch = CloseLatch::new();
        slot.link = Some(Link {
            id,
            transport,
            latch: latch.clone(),
            created_at: Instant::now(),
        });
        self.set_state(ConnectionState::Connecting);

        #[cfg(feature = "tracing")]
        tracing::debug!(endpoint = %self.endpoint, transport = id, "Opening transport");

        tokio::spawn(Self::event_loop(Arc::downgrade(self), id, latch, events));
        Ok(())
    }

    /// Routes one transport's events to the handlers until the feed ends.
    async fn event_loop(inner: Weak<Self>, id: u64, latch: CloseLatch, mut events: EventStream) {
        while let Some(event) = events.recv().await {
            let Some(inner) = inner.upgrade() else {
                break;
            };

            match event {
                TransportEvent::Open => inner.handle_open(id),
                TransportEvent::Frame(frame) => inner.handle_frame(id, frame),
                TransportEvent::Error(reason) => {
                    if latch.fire() {
                        inner.handle_close(id, Closure::Error(reason));
                    }
                }
                TransportEvent::Close(info) => {
                    if latch.fire() {
                        inner.handle_close(id, Closure::Closed(info));
                    }
                }
            }
        }
    }

    fn handle_open(&self, id: u64) {
        let mut slot = self.lock();
        let is_current = slot
            .link
            .as_ref()
            .is_some_and(|link| link.id == id && link.transport.is_open());
        if !is_current {
            return;
        }

        slot.reconnect_attempt = 0;
        self.set_state(ConnectionState::Connected {
            since: Instant::now(),
        });
        drop(slot);

        self.dispatcher.expect_ready();
        self.publish(Event::Connected);
    }

    fn handle_frame(&self, id: u64, frame: Frame) {
        let is_current = self.lock().link.as_ref().is_some_and(|link| link.id == id);
        if !is_current {
            #[cfg(feature = "tracing")]
            tracing::trace!(transport = id, "Dropping frame from detached transport");
            return;
        }

        if let Err(e) = self.sequencer.enqueue(frame) {
            #[cfg(feature = "tracing")]
            tracing::error!("Message sequencer unavailable: {e}");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
        }
    }

    fn handle_close(self: &Arc<Self>, id: u64, closure: Closure) {
        let mut slot = self.lock();
        let Some(link) = slot.link.take_if(|link| link.id == id) else {
            return;
        };
        let early = link.created_at.elapsed() < self.config.grace_window;
        link.transport.close();

        // Only errors and unclean closes inside the grace window are failures;
        // every close is recovered from.
        let failed = match &closure {
            Closure::Error(_) => true,
            Closure::Closed(info) => !info.was_clean && early,
        };

        let attempt = slot.reconnect_attempt;

        #[cfg(feature = "tracing")]
        match &closure {
            Closure::Error(reason) => {
                tracing::warn!(endpoint = %self.endpoint, attempt, early, "WebSocket connection failed: {reason}");
            }
            Closure::Closed(info) if info.was_clean => {
                tracing::info!(endpoint = %self.endpoint, code = info.code, reason = %info.reason, "WebSocket closed by server");
            }
            Closure::Closed(info) => {
                tracing::warn!(endpoint = %self.endpoint, attempt, early, code = info.code, "WebSocket closed unexpectedly");
            }
        }

        self.set_state(ConnectionState::Disconnected);
        let next = self.schedule_reconnect(&mut slot);
        drop(slot);

        self.publish(Event::Disconnected);
        if failed {
            self.publish(Event::ConnectionFailed {
                master_url: self.identity.master_url.to_string(),
                attempt,
            });
        }
        self.publish(next);
    }

    /// Arms the reconnect timer, or declares the channel dead when the
    /// ceiling is reached. Returns `reconnecting` or `connection_dead`.
    fn schedule_reconnect(self: &Arc<Self>, slot: &mut Slot) -> Event {
        let attempt = slot.reconnect_attempt;

        if !self.scheduler.should_retry(attempt) {
            #[cfg(feature = "tracing")]
            tracing::error!(attempt, "Failed to reconnect, giving up");
            self.set_state(ConnectionState::Dead {
                reconnect_attempt: attempt,
            });
            return Event::ConnectionDead {
                reconnect_attempt: attempt,
            };
        }

        let delay = self.scheduler.next_delay(attempt);
        #[cfg(feature = "tracing")]
        tracing::info!("Connection lost, reconnecting in {delay:?}");

        Self::cancel_reconnect(slot);
        let timer = CancellationToken::new();
        slot.reconnect_timer = Some(timer.clone());
        self.set_state(ConnectionState::Reconnecting { attempt });

        let inner = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::select! {
                () = timer.cancelled() => {}
                () = sleep(delay) => {
                    if let Some(inner) = inner.upgrade() {
                        inner.reconnect(&timer);
                    }
                }
            }
        });

        Event::Reconnecting
    }

    fn reconnect(self: &Arc<Self>, timer: &CancellationToken) {
        let mut slot = self.lock();
        if timer.is_cancelled() {
            return;
        }
        slot.reconnect_timer = None;
        slot.reconnect_attempt += 1;
        let result = self.open_link(&mut slot);
        drop(slot);

        if let Err(e) = result {
            #[cfg(feature = "tracing")]
            tracing::error!("Reconnect abandoned: {e}");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
        }
    }

    async fn command_loop(inner: Weak<Self>, mut commands: BoxStream<'static, Command>) {
        while let Some(command) = commands.next().await {
            let Some(inner) = inner.upgrade() else {
                break;
            };

            match command {
                Command::InputReply { value } => {
                    let connection = ConnectionManager { inner };
                    if let Err(e) = connection.send_input_reply(value) {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Unable to send input reply: {e}");
                        #[cfg(not(feature = "tracing"))]
                        let _ = &e;
                    }
                }
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let slot = self.slot.get_mut().unwrap_or_else(PoisonError::into_inner);
        Self::cancel_reconnect(slot);
        Self::detach(slot);
    }
}
