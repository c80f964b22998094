#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(
    unused,
    reason = "Each integration test binary uses a different subset of these helpers"
)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use notebook_session_client::ConnectionManager;
use notebook_session_client::events::{BroadcastNotifier, Event, Notification};
use notebook_session_client::protocol::SessionIdentity;
use notebook_session_client::ws::config::Config;
use notebook_session_client::ws::transport::{self, EventStream, Peer, Transport};
use notebook_session_client::ws::Connector;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use url::Url;

pub const MASTER_URL: &str = "http://127.0.0.1:8888";
pub const SESSION_ID: &str = "2b1e6c0a";
pub const USERNAME: &str = "alice";

/// Connector handing every opened transport's [`Peer`] to the test.
pub struct MockConnector {
    opened: AtomicUsize,
    peers: mpsc::UnboundedSender<Peer>,
    endpoints: std::sync::Mutex<Vec<Url>>,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Peer>) {
        let (peers, peers_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            opened: AtomicUsize::new(0),
            peers,
            endpoints: std::sync::Mutex::new(Vec::new()),
        });
        (connector, peers_rx)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn endpoints(&self) -> Vec<Url> {
        self.endpoints.lock().unwrap().clone()
    }
}

impl Connector for MockConnector {
    fn open(&self, endpoint: &Url) -> notebook_session_client::Result<(Transport, EventStream)> {
        let (transport, events, peer) = transport::pair();
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.endpoints.lock().unwrap().push(endpoint.clone());
        drop(self.peers.send(peer));
        Ok((transport, events))
    }
}

pub struct Harness {
    pub connection: ConnectionManager,
    pub bus: Arc<BroadcastNotifier>,
    pub connector: Arc<MockConnector>,
    pub peers: mpsc::UnboundedReceiver<Peer>,
    pub notifications: broadcast::Receiver<Notification>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let bus = Arc::new(BroadcastNotifier::new(1024));
        let notifications = bus.subscribe();
        let (connector, peers) = MockConnector::new();

        let connection = ConnectionManager::builder()
            .identity(SessionIdentity::new(MASTER_URL, SESSION_ID, USERNAME).unwrap())
            .notifier(Arc::clone(&bus) as _)
            .config(config)
            .connector(connector.clone())
            .build()
            .unwrap();

        Self {
            connection,
            bus,
            connector,
            peers,
            notifications,
        }
    }

    /// Waits for the connector to open the next transport.
    pub async fn next_peer(&mut self) -> Peer {
        timeout(Duration::from_secs(600), self.peers.recv())
            .await
            .expect("no transport opened")
            .expect("connector dropped")
    }

    /// Starts the channel and opens the resulting transport.
    pub async fn connect(&mut self) -> Peer {
        self.connection.start_channel().unwrap();
        let peer = self.next_peer().await;
        peer.open();
        settle().await;
        peer
    }

    /// Events published since the last call.
    pub fn events(&mut self) -> Vec<Event> {
        std::iter::from_fn(|| self.notifications.try_recv().ok().map(|n| n.event)).collect()
    }
}

/// Lets spawned tasks run without moving the paused clock noticeably.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

pub fn count(events: &[Event], wanted: &Event) -> usize {
    events.iter().filter(|event| *event == wanted).count()
}
