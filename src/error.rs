use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;

use crate::ws::connection::ConnectionState;

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Error related to invalid input, such as a malformed master URL
    Validation,
    /// Internal error from dependencies
    Internal,
    /// Error related to WebSocket connections and frame handling
    WebSocket,
    /// An outbound send was attempted while the channel was not connected
    NotConnected,
    /// No usable socket transport exists in the host environment
    TransportUnavailable,
}

#[derive(Debug)]
pub struct Error {
    kind: Kind,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    backtrace: Backtrace,
}

impl Error {
    pub fn with_source<S: StdError + Send + Sync + 'static>(kind: Kind, source: S) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
            backtrace: Backtrace::capture(),
        }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    pub fn inner(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        let e = self.source.as_deref()?;
        e.downcast_ref::<E>()
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Validation {
            reason: message.into(),
        }
        .into()
    }

    #[must_use]
    pub fn not_connected(state: ConnectionState) -> Self {
        NotConnected { state }.into()
    }

    pub fn transport_unavailable<S: Into<String>>(reason: S) -> Self {
        TransportUnavailable {
            reason: reason.into(),
        }
        .into()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(src) => write!(f, "{:?}: {}", self.kind, src),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

#[non_exhaustive]
#[derive(Debug)]
pub struct Validation {
    pub reason: String,
}

impl fmt::Display for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid: {}", self.reason)
    }
}

impl StdError for Validation {}

/// Returned by outbound sends issued while the channel is not open.
#[non_exhaustive]
#[derive(Debug, Clone, Copy)]
pub struct NotConnected {
    /// Connection state observed when the send was rejected
    pub state: ConnectionState,
}

impl fmt::Display for NotConnected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel is not connected (state: {:?})", self.state)
    }
}

impl StdError for NotConnected {}

/// The host environment cannot provide a socket transport. Never retried.
#[non_exhaustive]
#[derive(Debug)]
pub struct TransportUnavailable {
    pub reason: String,
}

impl fmt::Display for TransportUnavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no WebSocket transport available: {}", self.reason)
    }
}

impl StdError for TransportUnavailable {}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::with_source(Kind::Validation, e)
    }
}

impl From<Validation> for Error {
    fn from(err: Validation) -> Self {
        Error::with_source(Kind::Validation, err)
    }
}

impl From<NotConnected> for Error {
    fn from(err: NotConnected) -> Self {
        Error::with_source(Kind::NotConnected, err)
    }
}

impl From<TransportUnavailable> for Error {
    fn from(err: TransportUnavailable) -> Self {
        Error::with_source(Kind::TransportUnavailable, err)
    }
}
