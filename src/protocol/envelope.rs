//! Outbound protocol message envelopes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::base64::Base64;
use serde_with::serde_as;
use uuid::Uuid;

use super::identity::SessionIdentity;

/// Messaging protocol version stamped on every header.
pub const PROTOCOL_VERSION: &str = "5.0";

/// Routing tag for replies to input requests.
pub const STDIN_CHANNEL: &str = "stdin";

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub msg_id: Uuid,
    pub username: String,
    pub session: String,
    pub msg_type: String,
    pub version: String,
    pub date: DateTime<Utc>,
}

/// A protocol message with header, metadata, content and binary buffers.
#[serde_as]
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub header: Header,
    #[serde(default)]
    pub parent_header: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub content: Value,
    #[serde_as(as = "Vec<Base64>")]
    #[serde(default)]
    pub buffers: Vec<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

impl Envelope {
    #[must_use]
    pub fn msg_id(&self) -> Uuid {
        self.header.msg_id
    }
}

/// Builds envelopes stamped with one session's identity.
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    identity: Arc<SessionIdentity>,
}

#[bon::bon]
impl EnvelopeBuilder {
    #[must_use]
    pub fn new(identity: Arc<SessionIdentity>) -> Self {
        Self { identity }
    }

    /// Builds an envelope with a fresh message id.
    ///
    /// ```
    /// use std::sync::Arc;
    /// use notebook_session_client::protocol::{EnvelopeBuilder, SessionIdentity};
    /// use serde_json::json;
    ///
    /// let identity = SessionIdentity::new("ws://localhost:8888", "s1", "alice")?;
    /// let envelopes = EnvelopeBuilder::new(Arc::new(identity));
    ///
    /// let envelope = envelopes
    ///     .message()
    ///     .msg_type("input_reply")
    ///     .content(json!({ "value": "42" }))
    ///     .channel("stdin")
    ///     .call();
    /// assert_eq!(envelope.header.version, "5.0");
    /// # Ok::<(), notebook_session_client::error::Error>(())
    /// ```
    #[builder]
    pub fn message(
        &self,
        #[builder(into)] msg_type: String,
        content: Value,
        #[builder(default)] metadata: Map<String, Value>,
        #[builder(default)] buffers: Vec<Vec<u8>>,
        #[builder(into)] channel: Option<String>,
    ) -> Envelope {
        Envelope {
            header: Header {
                msg_id: Uuid::new_v4(),
                username: self.identity.username.clone(),
                session: self.identity.session_id.clone(),
                msg_type,
                version: PROTOCOL_VERSION.to_owned(),
                date: Utc::now(),
            },
            parent_header: Map::new(),
            metadata,
            content,
            buffers,
            channel,
        }
    }

    #[must_use]
    pub fn identity(&self) -> &Arc<SessionIdentity> {
        &self.identity
    }
}
