//! Session identity, protocol envelopes and the default JSON codec.

pub mod codec;
pub mod envelope;
pub mod identity;

pub use codec::JsonCodec;
pub use envelope::{Envelope, EnvelopeBuilder, Header, PROTOCOL_VERSION, STDIN_CHANNEL};
pub use identity::SessionIdentity;
