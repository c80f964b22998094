use async_trait::async_trait;
use serde_json::Value;

use super::envelope::Envelope;
use crate::Result;
use crate::ws::error::WsError;
use crate::ws::traits::Codec;
use crate::ws::transport::Frame;

/// Plain JSON framing: one JSON document per text or binary frame.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    /// Synchronous decode used by [`Codec::decode`].
    pub fn parse(frame: &Frame) -> Result<Value> {
        let value = match frame {
            Frame::Text(text) => serde_json::from_str(text),
            Frame::Binary(bytes) => serde_json::from_slice(bytes),
        }
        .map_err(WsError::MessageParse)?;
        Ok(value)
    }
}

#[async_trait]
impl Codec for JsonCodec {
    async fn decode(&self, frame: Frame) -> Result<Value> {
        Self::parse(&frame)
    }

    fn encode(&self, envelope: &Envelope) -> Result<Frame> {
        Ok(Frame::Text(serde_json::to_string(envelope)?))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::error::Kind;
    use crate::protocol::{EnvelopeBuilder, SessionIdentity};

    #[tokio::test]
    async fn decodes_text_and_binary_frames() {
        let codec = JsonCodec;

        let text = codec
            .decode(Frame::Text(r#"{"exec":[1,2]}"#.to_owned()))
            .await
            .unwrap();
        let binary = codec
            .decode(Frame::Binary(br#"{"exec":[3]}"#.to_vec()))
            .await
            .unwrap();

        assert_eq!(text, json!({ "exec": [1, 2] }));
        assert_eq!(binary, json!({ "exec": [3] }));
    }

    #[tokio::test]
    async fn malformed_frame_is_websocket_error() {
        let error = JsonCodec
            .decode(Frame::Text("{not json".to_owned()))
            .await
            .unwrap_err();

        assert_eq!(error.kind(), Kind::WebSocket);
        assert!(matches!(
            error.downcast_ref::<WsError>(),
            Some(WsError::MessageParse(_))
        ));
    }

    #[test]
    fn encodes_envelope_as_text() {
        let identity = SessionIdentity::new("ws://localhost", "s1", "alice").unwrap();
        let envelope = EnvelopeBuilder::new(Arc::new(identity))
            .message()
            .msg_type("input_reply")
            .content(json!({ "value": "ok" }))
            .call();

        let Frame::Text(text) = JsonCodec.encode(&envelope).unwrap() else {
            panic!("expected a text frame");
        };
        let parsed: Envelope = serde_json::from_str(&text).unwrap();

        assert_eq!(parsed.msg_id(), envelope.msg_id());
    }
}
