use url::Url;

use crate::Result;
use crate::error::Error;

/// Immutable identity of one notebook session.
///
/// Derives the control-channel endpoint and stamps every outbound envelope.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    /// WebSocket base URL of the notebook server (`ws://` or `wss://`)
    pub master_url: Url,
    pub session_id: String,
    pub username: String,
}

impl SessionIdentity {
    /// `master_url` may use an HTTP scheme; it is upgraded to the matching
    /// WebSocket scheme.
    pub fn new<S: Into<String>, U: Into<String>>(
        master_url: &str,
        session_id: S,
        username: U,
    ) -> Result<Self> {
        let session_id = session_id.into();
        if session_id.is_empty() {
            return Err(Error::validation("session id must not be empty"));
        }

        Ok(Self {
            master_url: websocket_url(Url::parse(master_url)?)?,
            session_id,
            username: username.into(),
        })
    }

    /// Resolves the master URL from an explicit setting, falling back to the
    /// origin the client was served from.
    pub fn from_origin<S: Into<String>, U: Into<String>>(
        origin: &str,
        configured: Option<&str>,
        session_id: S,
        username: U,
    ) -> Result<Self> {
        let master_url = match configured {
            Some(url) if !url.trim().is_empty() => url,
            _ => origin,
        };
        Self::new(master_url, session_id, username)
    }

    /// `{master_url}/api/sessions/{session_id}/ws`
    pub fn endpoint(&self) -> Result<Url> {
        let mut endpoint = self.master_url.clone();
        endpoint
            .path_segments_mut()
            .map_err(|()| Error::validation("master url cannot be a base"))?
            .pop_if_empty()
            .extend(["api", "sessions", self.session_id.as_str(), "ws"]);
        Ok(endpoint)
    }
}

fn websocket_url(mut url: Url) -> Result<Url> {
    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => {
            return Err(Error::validation(format!(
                "unsupported master url scheme `{other}`"
            )));
        }
    };

    if url.scheme() != scheme {
        url.set_scheme(scheme)
            .map_err(|()| Error::validation("unable to upgrade master url scheme"))?;
    }
    Ok(url)
}
