//! Core traits for the session channel pipeline.

use async_trait::async_trait;
use serde_json::Value;

use super::transport::Frame;
use crate::protocol::Envelope;

/// Converts raw frames to structured messages and envelopes to frames.
///
/// Decoding is asynchronous so that codecs may defer to blocking or remote
/// work; the [`MessageSequencer`](super::sequencer::MessageSequencer) still
/// dispatches in arrival order.
///
/// # Example
///
/// ```ignore
/// pub struct Utf8Codec;
///
/// #[async_trait]
/// impl Codec for Utf8Codec {
///     async fn decode(&self, frame: Frame) -> crate::Result<Value> {
///         JsonCodec::parse(&frame)
///     }
///
///     fn encode(&self, envelope: &Envelope) -> crate::Result<Frame> {
///         Ok(Frame::Text(serde_json::to_string(envelope)?))
///     }
/// }
/// ```
#[async_trait]
pub trait Codec: Send + Sync + 'static {
    async fn decode(&self, frame: Frame) -> crate::Result<Value>;

    fn encode(&self, envelope: &Envelope) -> crate::Result<Frame>;
}

/// Receives decoded messages, one at a time, in arrival order.
#[async_trait]
pub trait Dispatcher: Send + Sync + 'static {
    async fn dispatch(&self, message: Value) -> crate::Result<()>;
}
