//! Core WebSocket infrastructure.
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: connection state machine with backoff reconnection
//! - [`BackoffScheduler`]: reconnect delay and give-up policy
//! - [`MessageSequencer`]: ordered, failure-isolated inbound pipeline
//! - [`Connector`] / [`Transport`]: the socket boundary, with a
//!   `tokio-tungstenite` implementation in [`TungsteniteConnector`]
//! - [`Codec`] / [`Dispatcher`]: seams for frame decoding and message handling

pub mod backoff;
pub mod config;
pub mod connection;
pub mod error;
pub mod sequencer;
pub mod traits;
pub mod transport;

pub use backoff::BackoffScheduler;
pub use connection::{ConnectionManager, ConnectionState};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use sequencer::MessageSequencer;
pub use traits::*;
pub use transport::{Connector, Frame, Transport, TungsteniteConnector};
