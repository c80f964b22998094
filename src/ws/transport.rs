//! Transport handles and the production `tokio-tungstenite` connector.
//!
//! A [`Connector`] opens a [`Transport`] without waiting for the handshake;
//! progress arrives on the returned [`EventStream`]. The [`Peer`] is the other
//! end of a [`pair`] and is what connectors (and tests) use to drive one.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior, interval, sleep_until};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use url::Url;

use super::config::Config;
use super::error::WsError;
use crate::Result;
use crate::error::Error;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code reported when a connection drops without a closing handshake.
const ABNORMAL_CLOSURE: u16 = 1006;

/// Receiving half of a transport's event feed.
pub type EventStream = mpsc::UnboundedReceiver<TransportEvent>;

/// A raw WebSocket payload.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(bytes) => Message::Binary(bytes.into()),
        }
    }
}

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
    /// Whether the closing handshake completed
    pub was_clean: bool,
}

impl CloseInfo {
    #[must_use]
    pub fn abnormal() -> Self {
        Self {
            code: ABNORMAL_CLOSURE,
            reason: String::new(),
            was_clean: false,
        }
    }

    #[must_use]
    pub fn normal() -> Self {
        Self {
            code: 1000,
            reason: String::new(),
            was_clean: true,
        }
    }

    fn from_frame(frame: Option<&CloseFrame>) -> Self {
        frame.map_or_else(Self::normal, |frame| Self {
            code: u16::from(frame.code),
            reason: frame.reason.as_str().to_owned(),
            was_clean: true,
        })
    }
}

/// Lifecycle and traffic reported by a transport.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Frame(Frame),
    Error(String),
    Close(CloseInfo),
}

/// Requests flowing from a [`Transport`] to its [`Peer`].
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(Frame),
    Close,
}

/// Handle to one WebSocket connection attempt.
#[derive(Debug, Clone)]
pub struct Transport {
    ready: watch::Receiver<ReadyState>,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl Transport {
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        *self.ready.borrow()
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }

    pub fn send(&self, frame: Frame) -> Result<()> {
        self.outbound
            .send(Outbound::Frame(frame))
            .map_err(|_e| WsError::ConnectionClosed)?;
        Ok(())
    }

    /// Requests a graceful close. No-op once the peer is gone.
    pub fn close(&self) {
        _ = self.outbound.send(Outbound::Close);
    }
}

/// Driving end of a [`Transport`].
#[derive(Debug)]
pub struct Peer {
    ready: watch::Sender<ReadyState>,
    events: mpsc::UnboundedSender<TransportEvent>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
}

impl Peer {
    pub fn open(&self) {
        self.ready.send_replace(ReadyState::Open);
        _ = self.events.send(TransportEvent::Open);
    }

    pub fn deliver(&self, frame: Frame) {
        _ = self.events.send(TransportEvent::Frame(frame));
    }

    /// Reports an error. The ready state is left to the following `close`.
    pub fn fail<S: Into<String>>(&self, reason: S) {
        _ = self.events.send(TransportEvent::Error(reason.into()));
    }

    pub fn closing(&self) {
        self.ready.send_replace(ReadyState::Closing);
    }

    pub fn close(&self, info: CloseInfo) {
        self.ready.send_replace(ReadyState::Closed);
        _ = self.events.send(TransportEvent::Close(info));
    }

    /// Next request from the transport; `None` once every handle is dropped.
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.outbound.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Outbound> {
        self.outbound.try_recv().ok()
    }

    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        *self.ready.borrow()
    }
}

/// Creates a connected transport/peer pair in the `Connecting` state.
#[must_use]
pub fn pair() -> (Transport, EventStream, Peer) {
    let (ready_tx, ready_rx) = watch::channel(ReadyState::Connecting);
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    let transport = Transport {
        ready: ready_rx,
        outbound: outbound_tx,
    };
    let peer = Peer {
        ready: ready_tx,
        events: events_tx,
        outbound: outbound_rx,
    };
    (transport, events_rx, peer)
}

/// One-shot latch ensuring a single close-handling path per transport.
#[derive(Debug, Clone, Default)]
pub struct CloseLatch(Arc<AtomicBool>);

impl CloseLatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` for the first caller only.
    pub fn fire(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[must_use]
    pub fn is_fired(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Opens transports to an endpoint.
pub trait Connector: Send + Sync + 'static {
    fn open(&self, endpoint: &Url) -> Result<(Transport, EventStream)>;
}

/// Production connector backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Default)]
pub struct TungsteniteConnector {
    config: Config,
}

impl TungsteniteConnector {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    async fn drive(endpoint: Url, mut peer: Peer, config: Config) {
        let ws_stream = match connect_async(endpoint.as_str()).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                let error = Error::from(e);
                #[cfg(feature = "tracing")]
                tracing::warn!(%endpoint, "Unable to connect: {error}");
                peer.fail(error.to_string());
                peer.close(CloseInfo::abnormal());
                return;
            }
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(%endpoint, "WebSocket opened");
        peer.open();

        let info = Self::handle_connection(ws_stream, &mut peer, &config).await;

        #[cfg(feature = "tracing")]
        tracing::debug!(%endpoint, code = info.code, clean = info.was_clean, "WebSocket closed");
        peer.close(info);
    }

    /// Pumps frames both ways until the connection ends.
    async fn handle_connection(ws_stream: WsStream, peer: &mut Peer, config: &Config) -> CloseInfo {
        let (mut write, mut read) = ws_stream.split();

        let mut ping_interval = interval(config.heartbeat_interval);
        ping_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ping_interval.tick().await;

        let pong_deadline = config.heartbeat_interval + config.heartbeat_timeout;
        let mut last_pong = Instant::now();
        let mut closing = false;
        // Bounds how long a requested close waits for the server's reply
        let mut close_deadline = Instant::now();

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            #[cfg(feature = "tracing")]
                            tracing::trace!(text = %text.as_str(), "Received WebSocket text message");
                            peer.deliver(Frame::Text(text.as_str().to_owned()));
                        }
                        Some(Ok(Message::Binary(bytes))) => {
                            peer.deliver(Frame::Binary(bytes.to_vec()));
                        }
                        Some(Ok(Message::Pong(_))) => {
                            last_pong = Instant::now();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            return CloseInfo::from_frame(frame.as_ref());
                        }
                        Some(Ok(_)) => {
                            // Pings are answered by tungstenite itself.
                        }
                        Some(Err(e)) => {
                            if closing {
                                return CloseInfo::normal();
                            }
                            peer.fail(WsError::Connection(e).to_string());
                            return CloseInfo::abnormal();
                        }
                        None => {
                            return if closing { CloseInfo::normal() } else { CloseInfo::abnormal() };
                        }
                    }
                }

                outbound = peer.recv(), if !closing => {
                    match outbound {
                        Some(Outbound::Frame(frame)) => {
                            if let Err(e) = write.send(frame.into()).await {
                                peer.fail(WsError::Connection(e).to_string());
                                return CloseInfo::abnormal();
                            }
                        }
                        Some(Outbound::Close) | None => {
                            closing = true;
                            close_deadline = Instant::now() + config.heartbeat_timeout;
                            peer.closing();
                            if write.send(Message::Close(None)).await.is_err() {
                                return CloseInfo::normal();
                            }
                        }
                    }
                }

                _ = ping_interval.tick(), if !closing => {
                    if last_pong.elapsed() > pong_deadline {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Heartbeat timeout: no PONG received within {pong_deadline:?}");
                        peer.fail("heartbeat timeout");
                        return CloseInfo::abnormal();
                    }
                    if let Err(e) = write.send(Message::Ping(Vec::<u8>::new().into())).await {
                        peer.fail(WsError::Connection(e).to_string());
                        return CloseInfo::abnormal();
                    }
                }

                () = sleep_until(close_deadline), if closing => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Close handshake not answered within {:?}, dropping connection", config.heartbeat_timeout);
                    return CloseInfo::abnormal();
                }
            }
        }
    }
}

impl Connector for TungsteniteConnector {
    fn open(&self, endpoint: &Url) -> Result<(Transport, EventStream)> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::transport_unavailable(e.to_string()))?;

        let (transport, events, peer) = pair();
        runtime.spawn(Self::drive(endpoint.clone(), peer, self.config.clone()));

        Ok((transport, events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Kind;

    #[test]
    fn latch_fires_once() {
        let latch = CloseLatch::new();
        let other = latch.clone();

        assert!(latch.fire());
        assert!(!other.fire());
        assert!(other.is_fired());
    }

    #[tokio::test]
    async fn peer_drives_ready_state() {
        let (transport, mut events, peer) = pair();
        assert_eq!(transport.ready_state(), ReadyState::Connecting);

        peer.open();
        assert!(transport.is_open());
        assert_eq!(events.recv().await, Some(TransportEvent::Open));

        peer.close(CloseInfo::normal());
        assert_eq!(transport.ready_state(), ReadyState::Closed);
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Close(CloseInfo::normal()))
        );
    }

    #[tokio::test]
    async fn send_reaches_peer_and_fails_once_peer_is_gone() {
        let (transport, _events, mut peer) = pair();

        transport.send(Frame::Text("hi".to_owned())).unwrap();
        transport.close();
        assert_eq!(
            peer.recv().await,
            Some(Outbound::Frame(Frame::Text("hi".to_owned())))
        );
        assert_eq!(peer.recv().await, Some(Outbound::Close));

        drop(peer);
        let error = transport.send(Frame::Text("late".to_owned())).unwrap_err();
        assert_eq!(error.kind(), Kind::WebSocket);
    }

    #[test]
    fn connector_without_runtime_is_unavailable() {
        let endpoint = Url::parse("ws://127.0.0.1:1/api/sessions/s/ws").unwrap();

        let error = TungsteniteConnector::default().open(&endpoint).unwrap_err();

        assert_eq!(error.kind(), Kind::TransportUnavailable);
    }
}
